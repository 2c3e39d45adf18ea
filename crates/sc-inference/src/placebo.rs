//! Placebo (permutation) inference statistics.
//!
//! Each donor is re-run through the full pipeline as if it were the
//! treated unit; the resulting fit ratios (RMSPE-post / RMSPE-pre) form
//! the reference distribution against which the real treated unit is
//! ranked. This module holds the statistic types and the aggregation
//! step; the fan-out over donors lives in [`crate::pipeline`], and must
//! complete for every non-skipped unit before [`aggregate`] runs, since
//! the p-value denominator depends on the final exclusion counts.

use serde::{Deserialize, Serialize};

use crate::effect::EffectEstimate;

/// Fit-ratio statistic for one unit (real treated or placebo).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFitRatio {
    /// Unit id.
    pub unit: String,
    /// Pre-window RMSPE.
    pub rmspe_pre: f64,
    /// Post-window RMSPE.
    pub rmspe_post: f64,
    /// `rmspe_post / rmspe_pre` (infinite when only the pre fit is exact).
    pub ratio: f64,
}

impl UnitFitRatio {
    /// Build the statistic from an effect estimate.
    pub fn from_effect(unit: impl Into<String>, effect: &EffectEstimate) -> Self {
        let rmspe_pre = effect.rmspe_pre;
        let rmspe_post = effect.rmspe_post;
        Self { unit: unit.into(), rmspe_pre, rmspe_post, ratio: fit_ratio(rmspe_pre, rmspe_post) }
    }
}

/// Post/pre RMSPE ratio with the zero-denominator cases pinned down:
/// an exact pre fit with a nonzero post gap is an infinite degradation,
/// and an exact fit on both windows is no degradation at all.
pub fn fit_ratio(rmspe_pre: f64, rmspe_post: f64) -> f64 {
    if rmspe_pre > 0.0 {
        rmspe_post / rmspe_pre
    } else if rmspe_post > 0.0 {
        f64::INFINITY
    } else {
        1.0
    }
}

/// A placebo run that could not be completed (e.g. its own donor pool
/// emptied out). Skipped, recorded, never fatal for inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedUnit {
    /// The placebo unit.
    pub unit: String,
    /// Why its run failed.
    pub reason: String,
}

/// Reference distribution from the placebo reruns plus the treated unit's
/// rank and one-sided empirical p-value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceboDistribution {
    /// The real treated unit's statistic.
    pub treated: UnitFitRatio,
    /// Completed placebo statistics, sorted by ratio descending.
    /// Degenerate entries (see `n_degenerate`) are listed but not ranked.
    pub placebos: Vec<UnitFitRatio>,
    /// Rank of the treated ratio from the top within {treated} ∪ {ranked
    /// placebos}; 1 = most extreme.
    pub rank: usize,
    /// Ranking denominator: 1 + placebos with a non-degenerate pre fit.
    pub n_ranked: usize,
    /// `rank / n_ranked`.
    pub p_value: f64,
    /// Placebos excluded from the ranking because their pre-window RMSPE
    /// fell below the degeneracy epsilon.
    pub n_degenerate: usize,
    /// Placebo runs that failed and were skipped.
    pub skipped: Vec<SkippedUnit>,
}

/// Rank the treated unit against the completed placebo runs.
///
/// Placebos whose `rmspe_pre` is below `degenerate_epsilon` stay in the
/// output for inspection but drop out of the ranking denominator (their
/// ratios blow up on division, not on signal). The treated unit itself is
/// always ranked. Ties in the ratio resolve in the treated unit's favor
/// (strictly-greater counting).
pub fn aggregate(
    treated: UnitFitRatio,
    mut placebos: Vec<UnitFitRatio>,
    skipped: Vec<SkippedUnit>,
    degenerate_epsilon: f64,
) -> PlaceboDistribution {
    let n_degenerate =
        placebos.iter().filter(|u| u.rmspe_pre < degenerate_epsilon).count();

    let rank = 1 + placebos
        .iter()
        .filter(|u| u.rmspe_pre >= degenerate_epsilon)
        .filter(|u| u.ratio > treated.ratio)
        .count();
    let n_ranked = placebos.len() - n_degenerate + 1;
    let p_value = rank as f64 / n_ranked as f64;

    placebos.sort_by(|a, b| b.ratio.partial_cmp(&a.ratio).unwrap_or(std::cmp::Ordering::Equal));

    PlaceboDistribution { treated, placebos, rank, n_ranked, p_value, n_degenerate, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn unit(name: &str, pre: f64, post: f64) -> UnitFitRatio {
        UnitFitRatio { unit: name.into(), rmspe_pre: pre, rmspe_post: post, ratio: fit_ratio(pre, post) }
    }

    #[test]
    fn treated_most_extreme_among_eleven() {
        // Ten placebos with modest degradation, treated far worse.
        let treated = unit("t", 1.0, 20.0);
        let placebos: Vec<UnitFitRatio> =
            (0..10).map(|i| unit(&format!("d{i}"), 1.0, 1.0 + i as f64 * 0.3)).collect();

        let dist = aggregate(treated, placebos, Vec::new(), 1e-8);
        assert_eq!(dist.rank, 1);
        assert_eq!(dist.n_ranked, 11);
        assert_abs_diff_eq!(dist.p_value, 1.0 / 11.0, epsilon = 1e-12);
        // Output sorted most-extreme first.
        assert!(dist.placebos[0].ratio >= dist.placebos[9].ratio);
    }

    #[test]
    fn middling_treated_gets_middling_p() {
        let treated = unit("t", 1.0, 2.5);
        let placebos = vec![
            unit("a", 1.0, 4.0),
            unit("b", 1.0, 3.0),
            unit("c", 1.0, 2.0),
            unit("d", 1.0, 1.0),
        ];
        let dist = aggregate(treated, placebos, Vec::new(), 1e-8);
        assert_eq!(dist.rank, 3);
        assert_eq!(dist.n_ranked, 5);
        assert_abs_diff_eq!(dist.p_value, 0.6, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_placebos_shrink_the_denominator() {
        let treated = unit("t", 1.0, 5.0);
        let placebos = vec![
            unit("a", 1.0, 2.0),
            unit("b", 0.0, 3.0), // exact pre fit: infinite ratio, excluded
            unit("c", 1e-12, 1.0), // below epsilon, excluded
        ];
        let dist = aggregate(treated, placebos, Vec::new(), 1e-8);
        assert_eq!(dist.n_degenerate, 2);
        assert_eq!(dist.n_ranked, 2);
        // The infinite-ratio placebo must not have outranked the treated unit.
        assert_eq!(dist.rank, 1);
        assert_abs_diff_eq!(dist.p_value, 0.5, epsilon = 1e-12);
        assert_eq!(dist.placebos.len(), 3);
    }

    #[test]
    fn skips_are_reported_not_ranked() {
        let treated = unit("t", 1.0, 2.0);
        let placebos = vec![unit("a", 1.0, 1.0)];
        let skipped =
            vec![SkippedUnit { unit: "b".into(), reason: "empty donor pool: ...".into() }];
        let dist = aggregate(treated, placebos, skipped, 1e-8);
        assert_eq!(dist.n_ranked, 2);
        assert_eq!(dist.skipped.len(), 1);
        assert_eq!(dist.skipped[0].unit, "b");
    }

    #[test]
    fn all_placebos_skipped_gives_p_one() {
        let treated = unit("t", 1.0, 2.0);
        let dist = aggregate(treated, Vec::new(), Vec::new(), 1e-8);
        assert_eq!(dist.rank, 1);
        assert_eq!(dist.n_ranked, 1);
        assert_abs_diff_eq!(dist.p_value, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn ties_resolve_toward_the_treated_unit() {
        let treated = unit("t", 2.0, 4.0);
        let placebos = vec![unit("a", 1.0, 2.0), unit("b", 1.0, 3.0)];
        let dist = aggregate(treated, placebos, Vec::new(), 1e-8);
        // "a" ties at ratio 2.0; only "b" strictly exceeds.
        assert_eq!(dist.rank, 2);
    }

    #[test]
    fn fit_ratio_edge_cases() {
        assert_eq!(fit_ratio(2.0, 6.0), 3.0);
        assert!(fit_ratio(0.0, 1.0).is_infinite());
        assert_eq!(fit_ratio(0.0, 0.0), 1.0);
    }
}
