//! 🧾 The run report: what a rerank run hands back to whoever asked.
//!
//! Serializes to a stable JSON contract (`status`, `message`, `index`, `formula`, `stats`,
//! `preview`, `results`) and renders to terminal tables for humans.
//!
//! 🦆 The duck reads the JSON. The humans read the tables. Everyone is served.

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;

use crate::common::{ScoreResult, SyncOutcome, round2};
use crate::error::SyncError;
use crate::progress::format_number;
use crate::stats::{PreviewSamples, RunStatistics};

/// 🔢 How many failed items the terminal view lists before it says "and N more".
const FAILED_ITEMS_SHOWN: usize = 10;

/// 🚦 How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    DryRun,
    Completed,
    Error,
}

impl RunStatus {
    /// 🚪 0 for `dry_run` and `completed` (partial write failures included), 1 for `error`.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Error => 1,
            RunStatus::DryRun | RunStatus::Completed => 0,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunStatus::DryRun => "dry_run",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        })
    }
}

/// 📦 One run, fully accounted for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub message: String,
    pub index: String,
    pub formula: String,
    /// 🏷️ `SyncError::kind()` when `status` is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewSamples>,
    /// ✍️ Only present when the run actually wrote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<SyncOutcome>,
}

impl RunReport {
    pub fn dry_run(
        index: impl Into<String>,
        formula: impl Into<String>,
        stats: RunStatistics,
        preview: PreviewSamples,
    ) -> Self {
        Self {
            status: RunStatus::DryRun,
            message: format!(
                "DRY RUN: {} products scored, no changes made to the index",
                format_number(stats.total as u64)
            ),
            index: index.into(),
            formula: formula.into(),
            error_kind: None,
            stats: Some(stats),
            preview: Some(preview),
            results: None,
        }
    }

    pub fn completed(
        index: impl Into<String>,
        formula: impl Into<String>,
        stats: RunStatistics,
        preview: PreviewSamples,
        outcome: SyncOutcome,
    ) -> Self {
        Self {
            status: RunStatus::Completed,
            message: format!(
                "Updated {} products, {} failed",
                format_number(outcome.updated_count as u64),
                format_number(outcome.failed_count as u64)
            ),
            index: index.into(),
            formula: formula.into(),
            error_kind: None,
            stats: Some(stats),
            preview: Some(preview),
            results: Some(outcome),
        }
    }

    pub fn from_error(index: impl Into<String>, formula: impl Into<String>, err: &SyncError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
            index: index.into(),
            formula: formula.into(),
            error_kind: Some(err.kind()),
            stats: None,
            preview: None,
            results: None,
        }
    }

    /// 🎨 Terminal rendering: headline, statistics, preview, and write results.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("[{}] {}\n", self.status, self.message));
        out.push_str(&format!("index:   {}\n", self.index));
        out.push_str(&format!("formula: {}\n", self.formula));

        if let Some(stats) = &self.stats {
            out.push('\n');
            out.push_str(&render_stats(stats));
            out.push('\n');
        }
        if let Some(preview) = &self.preview {
            out.push_str("\n⬆️  To be promoted (lowest views)\n");
            out.push_str(&render_samples(&preview.lowest_views));
            out.push_str("\n⬇️  To be demoted (highest views)\n");
            out.push_str(&render_samples(&preview.highest_views));
            out.push('\n');
        }
        if let Some(results) = &self.results {
            out.push_str(&format!(
                "\n✍️  updated: {}   failed: {}\n",
                format_number(results.updated_count as u64),
                format_number(results.failed_count as u64)
            ));
            for failed in results.failed_items.iter().take(FAILED_ITEMS_SHOWN) {
                out.push_str(&format!("   💀 {}: {}\n", failed.item_id, failed.error));
            }
            if results.failed_items.len() > FAILED_ITEMS_SHOWN {
                out.push_str(&format!(
                    "   ... and {} more\n",
                    format_number((results.failed_items.len() - FAILED_ITEMS_SHOWN) as u64)
                ));
            }
        }
        out
    }
}

fn table_with_header(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

fn right(text: impl Into<String>) -> Cell {
    Cell::new(text.into()).set_alignment(CellAlignment::Right)
}

fn render_stats(stats: &RunStatistics) -> String {
    let mut table = table_with_header(vec!["", "min", "max", "avg"]);
    table.add_row(vec![
        Cell::new("trending_score"),
        right(format!("{:.2}", stats.score_min)),
        right(format!("{:.2}", stats.score_max)),
        right(format!("{:.2}", stats.score_mean)),
    ]);
    table.add_row(vec![
        Cell::new("views"),
        right(format_number(stats.views_min)),
        right(format_number(stats.views_max)),
        right(format!("{:.2}", round2(stats.views_mean))),
    ]);
    format!("{} products\n{table}", format_number(stats.total as u64))
}

fn render_samples(samples: &[ScoreResult]) -> String {
    let mut table = table_with_header(vec!["item_id", "views", "trending_score"]);
    for sample in samples {
        table.add_row(vec![
            Cell::new(&sample.item_id),
            right(format_number(sample.view_count)),
            right(format!("{:.2}", sample.trending_score)),
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FailedItem;

    fn results() -> Vec<ScoreResult> {
        vec![
            ScoreResult {
                item_id: "A".into(),
                view_count: 0,
                trending_score: 100.0,
            },
            ScoreResult {
                item_id: "B".into(),
                view_count: 9_999,
                trending_score: 0.0,
            },
        ]
    }

    fn summary() -> (RunStatistics, PreviewSamples) {
        let results = results();
        (
            RunStatistics::from_results(&results).expect("two results have stats"),
            PreviewSamples::from_results(&results, 5),
        )
    }

    #[test]
    fn the_one_where_a_dry_run_has_no_results_key() {
        let (stats, preview) = summary();
        let report = RunReport::dry_run("skus", "score = 100 - log10(views + 1) * 25", stats, preview);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "dry_run");
        assert_eq!(json["stats"]["total_products"], 2);
        assert!(json.get("results").is_none());
        assert!(json.get("error_kind").is_none());
        assert_eq!(report.status.exit_code(), 0);
    }

    #[test]
    fn the_one_where_partial_failure_is_still_completed() {
        let (stats, preview) = summary();
        let outcome = SyncOutcome::applied(1, vec![FailedItem::new("B", "mapper_parsing_exception: nope")]);
        let report = RunReport::completed("skus", "f", stats, preview, outcome);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["results"]["updated"], 1);
        assert_eq!(json["results"]["failed"], 1);
        assert_eq!(json["results"]["failed_items"][0]["item_id"], "B");
        assert_eq!(report.status.exit_code(), 0);
        assert!(report.render().contains("mapper_parsing_exception"));
    }

    #[test]
    fn the_one_where_errors_exit_non_zero() {
        let report = RunReport::from_error("skus", "f", &SyncError::NoRecords);
        assert_eq!(report.status, RunStatus::Error);
        assert_eq!(report.error_kind, Some("no_records"));
        assert!(report.stats.is_none());
        assert_eq!(report.status.exit_code(), 1);
    }

    #[test]
    fn the_one_where_the_tables_show_the_preview() {
        let (stats, preview) = summary();
        let rendered = RunReport::dry_run("skus", "f", stats, preview).render();
        assert!(rendered.contains("To be promoted"));
        assert!(rendered.contains("9,999"));
        assert!(rendered.contains("100.00"));
    }
}
