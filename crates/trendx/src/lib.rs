//! 📈 trendx: recompute trending scores from view counts and sync them into a search index.
//!
//! 🎬 *[a catalog. forty thousand products. the same twelve on top of every search page.]*
//! *[one batch job clears its throat.]*
//!
//! The crate is split the boring way:
//! - `scoring` does the math, `pipeline` runs fetch → transform → (preview | write).
//! - `backends` holds the adapters: warehouse / file / in-memory sources, Elasticsearch /
//!   in-memory indexes.
//! - `reporting` answers read-only questions about the index afterwards.
//! - `app_config` turns TOML + `TRENDX_*` env vars into something the above can use.
//!
//! 🦆

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::error;

pub mod app_config;
pub mod backends;
pub mod bulk;
pub mod common;
pub mod error;
pub mod pipeline;
mod progress;
pub mod report;
pub mod reporting;
pub mod scoring;
pub mod stats;

pub use app_config::{AppConfig, IndexConfig, RunConfig, SourceConfig, load_config};
pub use backends::{IndexBackend, MetricsSource, SearchIndex, SourceBackend};
pub use common::{FailedItem, MetricRecord, RunMode, ScoreResult, SyncOutcome};
pub use error::SyncError;
pub use pipeline::{ScoredBatch, SyncPipeline, SyncRequest, transform};
pub use report::{RunReport, RunStatus};
pub use reporting::IndexReporter;
pub use scoring::{FormulaParameters, trending_score};

/// 🏗️ Build both adapters from config. Nothing goes over the wire yet.
pub fn build_backends(config: &AppConfig) -> Result<(SourceBackend, Arc<IndexBackend>)> {
    let source = SourceBackend::from_config(&config.source_config);
    let index = IndexBackend::from_config(&config.index_config)
        .context("💀 Could not build the index adapter. Check the index_config section, especially the url.")?;
    Ok((source, Arc::new(index)))
}

/// 🚀 One rerank run, end to end, as configured.
///
/// Fatal run errors (bad knobs, empty source, unreachable index...) come back inside an
/// `error` report, never as `Err`. `Err` is reserved for things outside a run: adapter
/// construction, or a failed `--export` write.
///
/// With `export` set, every scored result lands in that NDJSON file before anything is
/// dispatched to the index.
pub async fn rerank(config: &AppConfig, export: Option<&Path>) -> Result<RunReport> {
    let formula = FormulaParameters::new(config.run.max_score, config.run.decay_factor).describe();
    let request = match SyncRequest::from_run_config(&config.run) {
        Ok(request) => request,
        Err(err) => {
            error!("💀 Run rejected before it started: {err}");
            return Ok(RunReport::from_error(&config.run.index, formula, &err));
        }
    };

    let (source, index) = build_backends(config)?;
    let pipeline = SyncPipeline::new(source, index);

    let Some(path) = export else {
        return Ok(pipeline.run(&request).await);
    };

    let batch = match pipeline.score_all(&request).await {
        Ok(batch) => batch,
        Err(err) => {
            error!("💀 Run aborted before export: {err}");
            return Ok(RunReport::from_error(&request.index, formula, &err));
        }
    };
    backends::file::write_results_ndjson(path, &batch.results)
        .await
        .with_context(|| format!("💀 Could not export scored results to '{}'", path.display()))?;

    Ok(match pipeline.dispatch(&request, batch).await {
        Ok(report) => report,
        Err(err) => {
            error!("💀 Run aborted after export: {err}");
            RunReport::from_error(&request.index, formula, &err)
        }
    })
}

/// 📁 Fetch, score, write NDJSON. The index is never touched, whatever `run.mode` says.
pub async fn export(config: &AppConfig, path: &Path) -> Result<RunReport> {
    let mut config = config.clone();
    config.run.mode = RunMode::DryRun.to_string();
    rerank(&config, Some(path)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryIndexConfig;

    fn config(records: Vec<MetricRecord>, mode: &str) -> AppConfig {
        AppConfig {
            source_config: SourceConfig::InMemory(records),
            index_config: IndexConfig::InMemory(InMemoryIndexConfig::default()),
            run: RunConfig {
                mode: mode.to_string(),
                show_progress: false,
                ..RunConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn the_one_where_a_configured_apply_run_completes() -> Result<()> {
        let report = rerank(&config(vec![MetricRecord::new("A", 0)], "apply"), None).await?;
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.results.map(|r| r.updated_count), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_typo_in_mode_is_a_report_not_a_crash() -> Result<()> {
        let report = rerank(&config(vec![MetricRecord::new("A", 0)], "aply"), None).await?;
        assert_eq!(report.status, RunStatus::Error);
        assert_eq!(report.error_kind, Some("invalid_parameters"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_export_writes_every_result_and_stays_dry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scores.ndjson");
        let records = vec![MetricRecord::new("A", 0), MetricRecord::new("B", 9_999)];

        let report = export(&config(records, "apply"), &path).await?;
        assert_eq!(report.status, RunStatus::DryRun);
        assert!(report.results.is_none());

        let contents = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"item_id\":\"A\""));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_source_exports_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scores.ndjson");
        let report = export(&config(Vec::new(), "dry_run"), &path).await?;
        assert_eq!(report.error_kind, Some("no_records"));
        assert!(!path.exists());
        Ok(())
    }
}
