//! Counterfactual projection from frozen weights.
//!
//! No fitting happens here: the weights come out of the solver once and
//! are applied unchanged across the whole time index, pre and post. That
//! freeze is what makes the post-treatment gap interpretable as a
//! treatment effect rather than a fitting artifact.

use serde::{Deserialize, Serialize};

use sc_core::{Error, Panel, Result};

use crate::solver::check_simplex;

/// Fitted donor weights, immutable after the solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    donors: Vec<String>,
    weights: Vec<f64>,
}

impl WeightVector {
    /// Pair donor ids with fitted weights, re-checking the simplex
    /// invariants (a violation here is a solver defect, not bad input).
    pub fn new(donors: Vec<String>, weights: Vec<f64>) -> Result<Self> {
        if donors.len() != weights.len() {
            return Err(Error::Solver(format!(
                "{} donors but {} weights",
                donors.len(),
                weights.len()
            )));
        }
        if donors.is_empty() {
            return Err(Error::Solver("weight vector must be non-empty".into()));
        }
        check_simplex(&weights, 1e-6)?;
        Ok(Self { donors, weights })
    }

    /// Donor ids, aligned with [`Self::weights`].
    pub fn donors(&self) -> &[String] {
        &self.donors
    }

    /// Fitted weights, aligned with [`Self::donors`].
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Weight for a specific donor, if present.
    pub fn get(&self, unit_id: &str) -> Option<f64> {
        self.donors.iter().position(|d| d == unit_id).map(|i| self.weights[i])
    }

    /// Number of donors.
    pub fn len(&self) -> usize {
        self.donors.len()
    }

    /// Whether the vector is empty (never true for a constructed value).
    pub fn is_empty(&self) -> bool {
        self.donors.is_empty()
    }

    /// Iterate `(donor, weight)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.donors.iter().map(|d| d.as_str()).zip(self.weights.iter().copied())
    }
}

/// Synthetic trajectory over the full time index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterfactual {
    /// Time index, identical to the panel's.
    pub periods: Vec<i64>,
    /// Synthetic outcome per period: `Σ_j w_j · outcome(donor_j, t)`.
    pub synthetic: Vec<f64>,
}

/// Project the weighted donor combination across the full time range.
///
/// Pure function of the weight vector and the panel.
pub fn project(weights: &WeightVector, panel: &Panel) -> Result<Counterfactual> {
    let donor_rows: Vec<usize> = weights
        .donors()
        .iter()
        .map(|d| {
            panel
                .unit_index(d)
                .ok_or_else(|| Error::Validation(format!("donor '{d}' is not in the panel")))
        })
        .collect::<Result<_>>()?;

    let n = panel.n_periods();
    let mut synthetic = vec![0.0_f64; n];
    for (&row, &w) in donor_rows.iter().zip(weights.weights()) {
        let series = panel.series_at(row);
        for (acc, &y) in synthetic.iter_mut().zip(series) {
            *acc += w * y;
        }
    }

    Ok(Counterfactual { periods: panel.periods().to_vec(), synthetic })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use sc_core::PanelRecord;

    fn panel() -> Panel {
        let mut rows = Vec::new();
        for (u, base) in [("a", 10.0), ("b", 20.0), ("c", 40.0)] {
            for p in 1..=4 {
                rows.push(PanelRecord {
                    unit_id: u.into(),
                    period: p,
                    outcome: base + p as f64,
                });
            }
        }
        Panel::from_records(&rows).unwrap()
    }

    #[test]
    fn projection_is_weighted_combination() {
        let p = panel();
        let wv = WeightVector::new(vec!["b".into(), "c".into()], vec![0.25, 0.75]).unwrap();
        let cf = project(&wv, &p).unwrap();
        assert_eq!(cf.periods, vec![1, 2, 3, 4]);
        for (t, &s) in cf.synthetic.iter().enumerate() {
            let period = t as f64 + 1.0;
            let expected = 0.25 * (20.0 + period) + 0.75 * (40.0 + period);
            assert_abs_diff_eq!(s, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn degenerate_weight_on_one_donor_reproduces_its_series() {
        let p = panel();
        let wv = WeightVector::new(vec!["b".into(), "c".into()], vec![1.0, 0.0]).unwrap();
        let cf = project(&wv, &p).unwrap();
        assert_eq!(cf.synthetic, p.series("b").unwrap());
    }

    #[test]
    fn unknown_donor_is_rejected() {
        let p = panel();
        let wv = WeightVector::new(vec!["zzz".into()], vec![1.0]).unwrap();
        assert!(project(&wv, &p).is_err());
    }

    #[test]
    fn weight_vector_enforces_simplex() {
        assert!(WeightVector::new(vec!["a".into(), "b".into()], vec![0.7, 0.7]).is_err());
        assert!(WeightVector::new(vec!["a".into()], vec![-0.5]).is_err());
        assert!(WeightVector::new(vec!["a".into()], vec![1.0, 0.0]).is_err());
        assert!(WeightVector::new(vec![], vec![]).is_err());

        let wv = WeightVector::new(vec!["a".into(), "b".into()], vec![0.6, 0.4]).unwrap();
        assert_eq!(wv.get("b"), Some(0.4));
        assert_eq!(wv.get("q"), None);
        assert_eq!(wv.len(), 2);
    }
}
