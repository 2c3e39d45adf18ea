//! Treatment-effect computation and fit diagnostics.
//!
//! Deterministic given its inputs: per-period gaps over the full index,
//! RMSPE over the pre- and post-treatment windows, and the post-window
//! summaries (cumulative, average, relative) read by the dashboard layer.
//! The post horizon is caller-selectable so the same fit can be summarized
//! over different spans (immediate aftermath vs. long run).

use serde::{Deserialize, Serialize};

use sc_core::{Error, Result};

/// One row of the per-period effect table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRow {
    /// Time period.
    pub period: i64,
    /// Observed outcome of the (pseudo-)treated unit.
    pub observed: f64,
    /// Synthetic outcome at the same period.
    pub synthetic: f64,
    /// `observed − synthetic`.
    pub gap: f64,
}

/// Per-period gaps plus scalar summaries over the chosen post horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectEstimate {
    /// Gap table over the full time index (pre and post).
    pub rows: Vec<EffectRow>,
    /// Root-mean-squared gap over the pre-treatment window.
    pub rmspe_pre: f64,
    /// Root-mean-squared gap over the post window.
    pub rmspe_post: f64,
    /// Sum of gaps over the post window.
    pub cumulative_effect: f64,
    /// `cumulative_effect / n_post`.
    pub average_effect: f64,
    /// Average gap relative to the average synthetic outcome over the post
    /// window; `None` when the synthetic mean is (numerically) zero.
    pub relative_effect: Option<f64>,
    /// Observed outcome summed over the post window.
    pub observed_post_total: f64,
    /// Synthetic outcome summed over the post window.
    pub synthetic_post_total: f64,
    /// Observed outcome averaged over the post window.
    pub observed_post_mean: f64,
    /// Synthetic outcome averaged over the post window.
    pub synthetic_post_mean: f64,
    /// Pre-window length.
    pub n_pre: usize,
    /// Post-window length (up to the chosen horizon).
    pub n_post: usize,
}

fn rmspe(gaps: impl Iterator<Item = f64>) -> f64 {
    let mut ss = 0.0;
    let mut n = 0usize;
    for g in gaps {
        ss += g * g;
        n += 1;
    }
    if n == 0 { 0.0 } else { (ss / n as f64).sqrt() }
}

/// Compute the effect estimate for one (pseudo-)treated unit.
///
/// `observed`, `synthetic` and `periods` must be aligned over the full
/// index. The post window runs from `treatment_period` through `post_end`
/// inclusive (default: the last period).
pub fn estimate(
    observed: &[f64],
    synthetic: &[f64],
    periods: &[i64],
    treatment_period: i64,
    post_end: Option<i64>,
) -> Result<EffectEstimate> {
    let n = periods.len();
    if observed.len() != n || synthetic.len() != n {
        return Err(Error::Validation(format!(
            "series lengths differ: {} observed, {} synthetic, {} periods",
            observed.len(),
            synthetic.len(),
            n
        )));
    }

    let horizon = post_end.unwrap_or(i64::MAX);
    if horizon < treatment_period {
        return Err(Error::Validation(format!(
            "post horizon {horizon} precedes treatment period {treatment_period}"
        )));
    }

    let rows: Vec<EffectRow> = periods
        .iter()
        .zip(observed.iter().zip(synthetic))
        .map(|(&period, (&obs, &syn))| EffectRow {
            period,
            observed: obs,
            synthetic: syn,
            gap: obs - syn,
        })
        .collect();

    let pre = || rows.iter().filter(|r| r.period < treatment_period);
    let post = || {
        rows.iter().filter(|r| r.period >= treatment_period && r.period <= horizon)
    };

    let n_pre = pre().count();
    let n_post = post().count();
    if n_pre == 0 {
        return Err(Error::Validation(format!(
            "no pre-treatment periods before {treatment_period}"
        )));
    }
    if n_post == 0 {
        return Err(Error::Validation(format!(
            "no post-treatment periods in [{treatment_period}, {horizon}]"
        )));
    }

    let rmspe_pre = rmspe(pre().map(|r| r.gap));
    let rmspe_post = rmspe(post().map(|r| r.gap));

    let cumulative_effect: f64 = post().map(|r| r.gap).sum();
    let average_effect = cumulative_effect / n_post as f64;

    let observed_post_total: f64 = post().map(|r| r.observed).sum();
    let synthetic_post_total: f64 = post().map(|r| r.synthetic).sum();
    let observed_post_mean = observed_post_total / n_post as f64;
    let synthetic_post_mean = synthetic_post_total / n_post as f64;

    let relative_effect = if synthetic_post_mean.abs() > f64::EPSILON {
        Some(average_effect / synthetic_post_mean)
    } else {
        None
    };

    Ok(EffectEstimate {
        rows,
        rmspe_pre,
        rmspe_post,
        cumulative_effect,
        average_effect,
        relative_effect,
        observed_post_total,
        synthetic_post_total,
        observed_post_mean,
        synthetic_post_mean,
        n_pre,
        n_post,
    })
}
