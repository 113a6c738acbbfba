//! 💀 Errors: the taxonomy of things that can go wrong in a rerank run.
//!
//! 🧠 Knowledge graph:
//! - `SyncError` is the library-facing error. Every variant is fatal for the run that hit it.
//! - Per-document write failures are NOT errors. They are data (`FailedItem`) and ride home
//!   inside the `SyncOutcome`. A run with 3 failed docs out of 40k is still `completed`.
//! - Adapter internals use `anyhow` with context strings. The pipeline flattens those into
//!   `detail` strings at the boundary so `SyncError` can stay `Clone`.
//!
//! 🦆 The duck has filed a bug report. It was closed as "working as intended".

use thiserror::Error;

use crate::report::RunStatus;

/// 🚨 The fatal half of the error taxonomy.
///
/// If you are holding one of these, no index write happened for this run.
/// (`IndexUnavailable` is raised by the pre-flight check, before the first chunk leaves.)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// 🔌 Couldn't even say hello to the warehouse. Connect refused, DNS, timeout, bad URL.
    #[error("💀 metrics source unavailable: {detail}")]
    SourceUnavailable { detail: String },

    /// 🧾 We said hello, asked a question, and the warehouse answered with an error.
    #[error("💀 metrics query failed: {detail}")]
    QueryFailed { detail: String },

    /// 🕳️ The source came back empty. Nothing to rerank, so nothing is written.
    #[error("💀 no records returned by the metrics source, refusing to rerank an empty catalog")]
    NoRecords,

    /// 🎛️ Bad knobs. Caught before the warehouse is bothered.
    #[error("💀 invalid parameters: {0}")]
    InvalidParameters(String),

    /// 📡 The index failed its pre-flight check (ping or existence) before any write.
    #[error("💀 search index unavailable: {detail}")]
    IndexUnavailable { detail: String },
}

impl SyncError {
    /// 🏷️ Stable snake_case label for reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::SourceUnavailable { .. } => "source_unavailable",
            SyncError::QueryFailed { .. } => "query_failed",
            SyncError::NoRecords => "no_records",
            SyncError::InvalidParameters(_) => "invalid_parameters",
            SyncError::IndexUnavailable { .. } => "index_unavailable",
        }
    }

    /// 🚦 Fatal errors always end a run with `status: error`. Every variant, every time.
    pub fn status(&self) -> RunStatus {
        RunStatus::Error
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        SyncError::InvalidParameters(message.into())
    }

    pub(crate) fn source_unavailable(err: impl std::fmt::Display) -> Self {
        SyncError::SourceUnavailable {
            detail: err.to_string(),
        }
    }

    pub(crate) fn query_failed(err: impl std::fmt::Display) -> Self {
        SyncError::QueryFailed {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_every_variant_knows_its_own_name() {
        assert_eq!(SyncError::NoRecords.kind(), "no_records");
        assert_eq!(SyncError::invalid("nope").kind(), "invalid_parameters");
        assert_eq!(SyncError::source_unavailable("refused").kind(), "source_unavailable");
        assert_eq!(SyncError::query_failed("syntax").kind(), "query_failed");
    }

    #[test]
    fn the_one_where_the_detail_survives_into_the_message() {
        let err = SyncError::query_failed("relation \"product_metrics\" does not exist");
        assert!(err.to_string().contains("product_metrics"));
    }
}
