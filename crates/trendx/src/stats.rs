//! 📊 Run statistics and preview samples.
//!
//! Computed once per run, from the full `ScoreResult` set, read-only afterwards.
//! The preview is what a human squints at before typing `--apply`: the five items
//! about to be promoted and the five about to be demoted.

use serde::Serialize;

use crate::common::{ScoreResult, serialize_round2};

/// 🔢 How many items each side of the preview shows.
pub const PREVIEW_SIZE: usize = 5;

/// 📊 count + min/max/mean over score and view count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    #[serde(rename = "total_products")]
    pub total: usize,
    #[serde(serialize_with = "serialize_round2")]
    pub score_min: f64,
    #[serde(serialize_with = "serialize_round2")]
    pub score_max: f64,
    #[serde(rename = "score_avg", serialize_with = "serialize_round2")]
    pub score_mean: f64,
    pub views_min: u64,
    pub views_max: u64,
    #[serde(rename = "views_avg", serialize_with = "serialize_round2")]
    pub views_mean: f64,
}

impl RunStatistics {
    /// 🧮 One pass over the results. `None` for an empty slice, since a mean of nothing is a lie.
    pub fn from_results(results: &[ScoreResult]) -> Option<Self> {
        let first = results.first()?;
        let mut stats = RunStatistics {
            total: results.len(),
            score_min: first.trending_score,
            score_max: first.trending_score,
            score_mean: 0.0,
            views_min: first.view_count,
            views_max: first.view_count,
            views_mean: 0.0,
        };
        let mut score_sum = 0.0_f64;
        // -- f64 sum so forty thousand large u64 view counts can't overflow
        let mut views_sum = 0.0_f64;
        for result in results {
            stats.score_min = stats.score_min.min(result.trending_score);
            stats.score_max = stats.score_max.max(result.trending_score);
            stats.views_min = stats.views_min.min(result.view_count);
            stats.views_max = stats.views_max.max(result.view_count);
            score_sum += result.trending_score;
            views_sum += result.view_count as f64;
        }
        stats.score_mean = score_sum / results.len() as f64;
        stats.views_mean = views_sum / results.len() as f64;
        Some(stats)
    }
}

/// 👀 The before-you-commit peek.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewSamples {
    /// ⬆️ lowest view counts, the ones about to be promoted
    pub lowest_views: Vec<ScoreResult>,
    /// ⬇️ highest view counts, the ones about to be demoted
    pub highest_views: Vec<ScoreResult>,
}

impl PreviewSamples {
    /// 🎯 Pick `n` from each end by view count. Ties keep fetch order (stable sort).
    pub fn from_results(results: &[ScoreResult], n: usize) -> Self {
        let mut ascending: Vec<usize> = (0..results.len()).collect();
        ascending.sort_by_key(|&i| results[i].view_count);

        let mut descending: Vec<usize> = (0..results.len()).collect();
        // -- comparator reversed, NOT the vec, so equal view counts stay in fetch order
        descending.sort_by(|&a, &b| results[b].view_count.cmp(&results[a].view_count));

        let pick = |order: Vec<usize>| -> Vec<ScoreResult> {
            order
                .into_iter()
                .take(n)
                .map(|i| results[i].clone())
                .collect()
        };

        Self {
            lowest_views: pick(ascending),
            highest_views: pick(descending),
        }
    }
}
