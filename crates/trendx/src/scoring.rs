// ai
//! 📉 Scoring: the one line of math this whole repo exists to run.
//!
//! ```text
//!   score = max_score - log10(views + 1) * decay_factor     then clamp to [0, max_score]
//! ```
//!
//! With the defaults (100, 25):
//!
//! ```text
//!   0 views     -> 100   (never seen, maximum promotion)
//!   9 views     ->  75
//!   99 views    ->  50
//!   999 views   ->  25
//!   9999 views  ->   0   (everybody has seen it, step aside)
//! ```
//!
//! 🧠 Knowledge graph:
//! - Pure. No I/O, no clock, no shared state. Property-tested below with proptest.
//! - Input coercion happens BEFORE the log: null, negative, NaN and unparsable all become 0.
//! - Consumed by `pipeline::transform`, and by nothing else that matters.
//!
//! ⚠️ log10 of a negative number is NaN, and NaN does not clamp the way you hope.
//! That is why coercion comes first. Ask me how I know. 🦆

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// 🔝 The ceiling. Never-viewed items land exactly here.
pub const DEFAULT_MAX_SCORE: f64 = 100.0;

/// 📉 How hard each decade of views pushes the score down.
pub const DEFAULT_DECAY_FACTOR: f64 = 25.0;

/// 🎛️ The two knobs of the formula, passed in fresh every run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormulaParameters {
    pub max_score: f64,
    pub decay_factor: f64,
}

impl Default for FormulaParameters {
    fn default() -> Self {
        Self {
            max_score: DEFAULT_MAX_SCORE,
            decay_factor: DEFAULT_DECAY_FACTOR,
        }
    }
}

impl FormulaParameters {
    pub fn new(max_score: f64, decay_factor: f64) -> Self {
        Self {
            max_score,
            decay_factor,
        }
    }

    /// 🔒 Both knobs must be finite and strictly positive.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !self.max_score.is_finite() || self.max_score <= 0.0 {
            return Err(SyncError::invalid(format!(
                "max_score must be a positive number, got {}",
                self.max_score
            )));
        }
        if !self.decay_factor.is_finite() || self.decay_factor <= 0.0 {
            return Err(SyncError::invalid(format!(
                "decay_factor must be a positive number, got {}",
                self.decay_factor
            )));
        }
        Ok(())
    }

    /// 🎯 Score an already-coerced view count.
    pub fn score(&self, view_count: u64) -> f64 {
        trending_score(Some(view_count as f64), self.max_score, self.decay_factor)
    }

    /// 📝 Human-readable formula, as shown in every report.
    pub fn describe(&self) -> String {
        format!(
            "score = {} - log10(views + 1) * {}",
            self.max_score, self.decay_factor
        )
    }
}

/// 📉 The transform itself.
///
/// `None`, negative, NaN and infinite inputs are treated as 0 views.
/// The result is always inside `[0, max_score]` for a positive `max_score`.
pub fn trending_score(view_count: Option<f64>, max_score: f64, decay_factor: f64) -> f64 {
    let views = match view_count {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    };
    let score = max_score - (views + 1.0).log10() * decay_factor;
    // -- 🔧 max/min rather than clamp: clamp panics when max_score < 0, and this fn never panics
    score.min(max_score).max(0.0)
}

/// 🧹 Coerce whatever the source handed us into a view count.
///
/// Numbers pass through (floats truncate, negatives become 0). Strings are parsed after
/// dropping thousands separators, so `"1,234"` is 1234. Everything else is 0.
pub fn coerce_view_count(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else {
                coerce_float(n.as_f64())
            }
        }
        serde_json::Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
            coerce_float(cleaned.parse::<f64>().ok())
        }
        _ => 0,
    }
}

/// 🧹 Same rule for warehouse integers, which arrive as nullable signed ints.
pub fn coerce_signed_view_count(value: Option<i64>) -> u64 {
    value.map_or(0, |v| u64::try_from(v).unwrap_or(0))
}

fn coerce_float(value: Option<f64>) -> u64 {
    match value {
        // -- `as` saturates for huge floats, which is the behavior we want
        Some(v) if v.is_finite() && v > 0.0 => v.trunc() as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn the_one_where_nobody_has_ever_looked_at_it() {
        assert_eq!(trending_score(Some(0.0), 100.0, 25.0), 100.0);
        assert_eq!(FormulaParameters::default().score(0), 100.0);
    }

    #[test]
    fn the_one_where_each_decade_of_views_costs_one_decay_step() {
        let params = FormulaParameters::new(100.0, 25.0);
        assert!(close(params.score(9), 75.0));
        assert!(close(params.score(99), 50.0));
        assert!(close(params.score(999), 25.0));
    }

    #[test]
    fn the_one_where_the_famous_item_bottoms_out_at_zero() {
        let params = FormulaParameters::new(100.0, 25.0);
        assert!(close(params.score(9_999), 0.0));
        assert_eq!(params.score(10_000_000), 0.0);
        assert_eq!(params.score(u64::MAX), 0.0);
    }

    #[test]
    fn the_one_where_missing_and_negative_views_mean_never_viewed() {
        assert_eq!(trending_score(None, 100.0, 30.0), 100.0);
        assert_eq!(trending_score(Some(-42.0), 100.0, 30.0), 100.0);
        assert_eq!(trending_score(Some(f64::NAN), 100.0, 30.0), 100.0);
    }

    #[test]
    fn the_one_where_the_formula_describes_itself() {
        assert_eq!(
            FormulaParameters::new(100.0, 30.0).describe(),
            "score = 100 - log10(views + 1) * 30"
        );
        assert_eq!(
            FormulaParameters::new(50.5, 12.5).describe(),
            "score = 50.5 - log10(views + 1) * 12.5"
        );
    }

    #[test]
    fn the_one_where_bad_knobs_are_rejected() {
        assert!(FormulaParameters::new(0.0, 25.0).validate().is_err());
        assert!(FormulaParameters::new(-1.0, 25.0).validate().is_err());
        assert!(FormulaParameters::new(100.0, 0.0).validate().is_err());
        assert!(FormulaParameters::new(f64::NAN, 25.0).validate().is_err());
        assert!(FormulaParameters::new(100.0, f64::INFINITY).validate().is_err());
        assert!(FormulaParameters::default().validate().is_ok());
    }

    #[test]
    fn the_one_where_json_view_counts_get_cleaned_up() {
        assert_eq!(coerce_view_count(&json!(42)), 42);
        assert_eq!(coerce_view_count(&json!(42.9)), 42);
        assert_eq!(coerce_view_count(&json!(-3)), 0);
        assert_eq!(coerce_view_count(&json!("1,234")), 1234);
        assert_eq!(coerce_view_count(&json!(" 77 ")), 77);
        assert_eq!(coerce_view_count(&json!("lots")), 0);
        assert_eq!(coerce_view_count(&json!(null)), 0);
        assert_eq!(coerce_view_count(&json!({"views": 5})), 0);
    }

    #[test]
    fn the_one_where_warehouse_nulls_become_zero() {
        assert_eq!(coerce_signed_view_count(None), 0);
        assert_eq!(coerce_signed_view_count(Some(-5)), 0);
        assert_eq!(coerce_signed_view_count(Some(5)), 5);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_score_stays_inside_its_bounds(
            views in any::<u64>(),
            max_score in 0.001f64..10_000.0,
            decay in 0.001f64..1_000.0,
        ) {
            let score = FormulaParameters::new(max_score, decay).score(views);
            prop_assert!(score >= 0.0);
            prop_assert!(score <= max_score);
        }

        #[test]
        fn prop_more_views_never_means_a_higher_score(
            a in 0u64..10_000_000,
            b in 0u64..10_000_000,
            max_score in 1.0f64..1_000.0,
            decay in 0.1f64..100.0,
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let params = FormulaParameters::new(max_score, decay);
            prop_assert!(params.score(low) >= params.score(high));
        }

        #[test]
        fn prop_scoring_is_deterministic(views in any::<u64>()) {
            let params = FormulaParameters::default();
            prop_assert_eq!(params.score(views).to_bits(), params.score(views).to_bits());
        }
    }
}
