// ai
//! 📦 Common data structures: the building blocks of trendx
//!
//! 🎬 COLD OPEN: INT. WAREHOUSE, 4:00 AM
//!
//! A cron fires. Forty thousand SKUs wake up, each clutching a view count like a
//! boarding pass. Some have been viewed a million times. Some have never been viewed
//! at all. Tonight, the quiet ones get promoted. Tonight, the famous ones get humbled.
//!
//! This module defines the structs that carry them through the pipeline:
//! `MetricRecord` in, `ScoreResult` through, `SyncOutcome` out.
//! Plus the little read-only aggregation shapes the reporting side asks the index for.
//!
//! 🦆

use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::SyncError;

/// 📥 One row from the metrics source: who, and how many eyeballs.
///
/// `view_count` is already coerced by the adapter: null, negative and garbage all became 0.
/// A missing view count means "never viewed", which is the most promotable state there is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub item_id: String,
    #[serde(default)]
    pub view_count: u64,
}

impl MetricRecord {
    pub fn new(item_id: impl Into<String>, view_count: u64) -> Self {
        Self {
            item_id: item_id.into(),
            view_count,
        }
    }
}

/// 🎯 A record after the formula has had its way with it.
///
/// No identity of its own. Recomputed every run, never persisted anywhere but the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub item_id: String,
    pub view_count: u64,
    #[serde(serialize_with = "serialize_round2")]
    pub trending_score: f64,
}

/// 🎛️ Preview or commit. There is no third option. (We checked.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// 👀 compute, summarize, write nothing
    #[default]
    DryRun,
    /// ✍️ compute, summarize, bulk-update the index
    Applied,
}

impl FromStr for RunMode {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // -- 🔧 humans type these in cron definitions and CI yaml; be forgiving about spelling
        match raw.trim().to_ascii_lowercase().as_str() {
            "dry_run" | "dry-run" | "dryrun" | "preview" => Ok(RunMode::DryRun),
            "apply" | "applied" => Ok(RunMode::Applied),
            other => Err(SyncError::invalid(format!(
                "unrecognized mode '{other}', expected 'dry_run' or 'apply'"
            ))),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::DryRun => write!(f, "dry_run"),
            RunMode::Applied => write!(f, "applied"),
        }
    }
}

/// 💔 One document the index refused, and the reason it gave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item_id: String,
    pub error: String,
}

impl FailedItem {
    pub fn new(item_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            error: error.into(),
        }
    }
}

/// 🧾 What one bulk chunk came back with. `success_count + failures.len()` == chunk length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    pub success_count: usize,
    pub failures: Vec<FailedItem>,
}

/// 🏁 The terminal verdict of a run. Constructed once, never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub mode: RunMode,
    #[serde(rename = "updated")]
    pub updated_count: usize,
    #[serde(rename = "failed")]
    pub failed_count: usize,
    pub failed_items: Vec<FailedItem>,
}

impl SyncOutcome {
    pub fn applied(updated_count: usize, failed_items: Vec<FailedItem>) -> Self {
        Self {
            mode: RunMode::Applied,
            updated_count,
            failed_count: failed_items.len(),
            failed_items,
        }
    }

    pub fn attempted(&self) -> usize {
        self.updated_count + self.failed_count
    }
}

// ============================================================
// 📊 Read-only aggregation shapes, used by reporting only
// ============================================================

/// 📊 min/max/avg/count of a numeric field. `None` when the index has no values for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldStats {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
}

/// 📏 One half-open range `[from, to)` for a range aggregation. Open ends are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeSpec {
    pub key: String,
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl RangeSpec {
    pub fn new(key: impl Into<String>, from: Option<f64>, to: Option<f64>) -> Self {
        Self {
            key: key.into(),
            from,
            to,
        }
    }

    pub(crate) fn contains(&self, value: f64) -> bool {
        self.from.is_none_or(|from| value >= from) && self.to.is_none_or(|to| value < to)
    }
}

/// 🪣 A range bucket as the index reported it, with the optional sub-average.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeBucket {
    pub key: String,
    pub doc_count: u64,
    pub avg: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// 📄 A document from a sorted search: its id and whatever `_source` fields came back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedDocument {
    pub id: String,
    pub source: serde_json::Value,
}

/// 💓 "Hello? Is this thing on?" and the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterHealth {
    pub cluster_name: String,
    pub version: String,
}

/// 🔢 Two decimals, the way humans like their scores.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn serialize_round2<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round2(*value))
}
