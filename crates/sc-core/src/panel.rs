//! Balanced outcome panel and treatment specification.
//!
//! The panel is handed over by the (external) ingestion layer as a long
//! table of `(unit_id, period, outcome)` rows and validated once into a
//! dense unit×period grid. Everything downstream reads the grid immutably,
//! which is what makes placebo iterations safe to run in parallel.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One row of the input table handed over by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRecord {
    /// Unit identifier (e.g. a municipality name).
    pub unit_id: String,
    /// Time period on a shared, evenly spaced index.
    pub period: i64,
    /// Observed outcome value.
    pub outcome: f64,
}

/// Validated, immutable unit×time outcome grid.
///
/// Invariants established by [`Panel::from_records`] and relied upon
/// everywhere downstream:
///
/// - every unit has an observation at every period (balanced);
/// - no duplicate `(unit, period)` keys;
/// - periods are strictly increasing with a uniform step;
/// - all outcomes are finite.
#[derive(Debug, Clone)]
pub struct Panel {
    units: Vec<String>,
    periods: Vec<i64>,
    /// Row-major outcome storage: `outcomes[u * n_periods + t]`.
    outcomes: Vec<f64>,
    unit_pos: HashMap<String, usize>,
}

impl Panel {
    /// Build and validate a panel from long-format records.
    ///
    /// Rows may arrive in any order; units and periods are sorted
    /// canonically. Errors identify the offending unit/period so the input
    /// can be corrected upstream.
    pub fn from_records(records: &[PanelRecord]) -> Result<Panel> {
        if records.is_empty() {
            return Err(Error::Validation("panel records must be non-empty".into()));
        }

        let unit_set: BTreeSet<&str> = records.iter().map(|r| r.unit_id.as_str()).collect();
        let period_set: BTreeSet<i64> = records.iter().map(|r| r.period).collect();

        let units: Vec<String> = unit_set.iter().map(|s| s.to_string()).collect();
        let periods: Vec<i64> = period_set.into_iter().collect();
        let n_units = units.len();
        let n_periods = periods.len();

        if n_periods < 2 {
            return Err(Error::Validation(format!(
                "time index must contain at least 2 periods, found {n_periods}"
            )));
        }

        // Uniform-step check. Strict monotonicity is already guaranteed by
        // the sorted de-duplicated index, so the remaining failure mode is
        // an uneven grid (e.g. a skipped month).
        let step = periods[1] - periods[0];
        if step <= 0 {
            return Err(Error::NonMonotonicTime(format!(
                "time step must be positive, found {step}"
            )));
        }
        for w in periods.windows(2) {
            if w[1] - w[0] != step {
                return Err(Error::NonMonotonicTime(format!(
                    "expected uniform step {step}, found gap {} between periods {} and {}",
                    w[1] - w[0],
                    w[0],
                    w[1]
                )));
            }
        }

        let unit_pos: HashMap<String, usize> =
            units.iter().enumerate().map(|(i, u)| (u.clone(), i)).collect();
        let period_pos: HashMap<i64, usize> =
            periods.iter().enumerate().map(|(i, &p)| (p, i)).collect();

        let mut grid: Vec<Option<f64>> = vec![None; n_units * n_periods];
        for r in records {
            if !r.outcome.is_finite() {
                return Err(Error::Validation(format!(
                    "outcome for unit '{}' at period {} is not finite",
                    r.unit_id, r.period
                )));
            }
            let u = unit_pos[r.unit_id.as_str()];
            let t = period_pos[&r.period];
            let cell = &mut grid[u * n_periods + t];
            if cell.is_some() {
                return Err(Error::DuplicateKey(format!(
                    "unit '{}' at period {} appears more than once",
                    r.unit_id, r.period
                )));
            }
            *cell = Some(r.outcome);
        }

        let mut outcomes = Vec::with_capacity(n_units * n_periods);
        for (u, unit) in units.iter().enumerate() {
            for (t, &period) in periods.iter().enumerate() {
                match grid[u * n_periods + t] {
                    Some(v) => outcomes.push(v),
                    None => {
                        return Err(Error::UnbalancedPanel(format!(
                            "unit '{unit}' has no observation at period {period}"
                        )));
                    }
                }
            }
        }

        Ok(Panel { units, periods, outcomes, unit_pos })
    }

    /// Number of units.
    pub fn n_units(&self) -> usize {
        self.units.len()
    }

    /// Number of time periods.
    pub fn n_periods(&self) -> usize {
        self.periods.len()
    }

    /// Unit identifiers in canonical (sorted) order.
    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// The shared time index, strictly increasing with uniform step.
    pub fn periods(&self) -> &[i64] {
        &self.periods
    }

    /// Dense index of a unit, if present.
    pub fn unit_index(&self, unit_id: &str) -> Option<usize> {
        self.unit_pos.get(unit_id).copied()
    }

    /// Whether the panel contains the given unit.
    pub fn contains_unit(&self, unit_id: &str) -> bool {
        self.unit_pos.contains_key(unit_id)
    }

    /// Position of a period on the time index, if present.
    pub fn period_index(&self, period: i64) -> Option<usize> {
        self.periods.binary_search(&period).ok()
    }

    /// Full outcome series for a unit, in time order.
    pub fn series(&self, unit_id: &str) -> Result<&[f64]> {
        let u = self
            .unit_index(unit_id)
            .ok_or_else(|| Error::Validation(format!("unknown unit '{unit_id}'")))?;
        Ok(self.series_at(u))
    }

    /// Full outcome series for a unit by dense index.
    pub fn series_at(&self, unit: usize) -> &[f64] {
        let n = self.n_periods();
        &self.outcomes[unit * n..(unit + 1) * n]
    }

    /// Single outcome by dense (unit, period) indices.
    pub fn outcome_at(&self, unit: usize, period: usize) -> f64 {
        self.outcomes[unit * self.n_periods() + period]
    }
}

/// Treated unit + intervention period.
///
/// Partitions the panel's time index into a pre-treatment window (strictly
/// before `treatment_period`) and a post-treatment window (at or after it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentSpec {
    /// Unit that received the intervention.
    pub treated_unit: String,
    /// First period at which the intervention is in effect.
    pub treatment_period: i64,
}

impl TreatmentSpec {
    /// Create a treatment specification.
    pub fn new(treated_unit: impl Into<String>, treatment_period: i64) -> Self {
        Self { treated_unit: treated_unit.into(), treatment_period }
    }

    /// Number of periods strictly before the treatment period.
    pub fn pre_len(&self, panel: &Panel) -> usize {
        panel.periods().partition_point(|&p| p < self.treatment_period)
    }

    /// Number of periods at or after the treatment period.
    pub fn post_len(&self, panel: &Panel) -> usize {
        panel.n_periods() - self.pre_len(panel)
    }

    /// Check that this treatment is usable against the given panel: the treated
    /// unit exists and both windows are non-empty. The configurable
    /// pre-window floor is enforced later, at donor selection.
    pub fn validate(&self, panel: &Panel) -> Result<()> {
        if !panel.contains_unit(&self.treated_unit) {
            return Err(Error::Validation(format!(
                "treated unit '{}' is not in the panel",
                self.treated_unit
            )));
        }
        let pre = self.pre_len(panel);
        if pre == 0 {
            return Err(Error::Validation(format!(
                "no pre-treatment periods before {}",
                self.treatment_period
            )));
        }
        if pre == panel.n_periods() {
            return Err(Error::Validation(format!(
                "no post-treatment periods at or after {}",
                self.treatment_period
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(rows: &[(&str, i64, f64)]) -> Vec<PanelRecord> {
        rows.iter()
            .map(|&(u, p, y)| PanelRecord { unit_id: u.into(), period: p, outcome: y })
            .collect()
    }

    fn small_panel() -> Panel {
        Panel::from_records(&records(&[
            ("a", 1, 1.0),
            ("a", 2, 2.0),
            ("a", 3, 3.0),
            ("b", 1, 4.0),
            ("b", 2, 5.0),
            ("b", 3, 6.0),
        ]))
        .unwrap()
    }

    #[test]
    fn builds_canonical_grid() {
        let p = small_panel();
        assert_eq!(p.n_units(), 2);
        assert_eq!(p.n_periods(), 3);
        assert_eq!(p.units(), &["a".to_string(), "b".to_string()]);
        assert_eq!(p.periods(), &[1, 2, 3]);
        assert_eq!(p.series("b").unwrap(), &[4.0, 5.0, 6.0]);
        assert_eq!(p.outcome_at(0, 2), 3.0);
        assert_eq!(p.period_index(2), Some(1));
        assert_eq!(p.period_index(7), None);
    }

    #[test]
    fn accepts_shuffled_rows() {
        let mut rows = records(&[
            ("b", 3, 6.0),
            ("a", 1, 1.0),
            ("b", 1, 4.0),
            ("a", 3, 3.0),
            ("b", 2, 5.0),
            ("a", 2, 2.0),
        ]);
        rows.reverse();
        let p = Panel::from_records(&rows).unwrap();
        assert_eq!(p.series("a").unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn rejects_duplicate_key() {
        let err = Panel::from_records(&records(&[
            ("a", 1, 1.0),
            ("a", 1, 9.0),
            ("a", 2, 2.0),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)), "{err}");
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn rejects_unbalanced_grid() {
        let err = Panel::from_records(&records(&[
            ("a", 1, 1.0),
            ("a", 2, 2.0),
            ("b", 1, 4.0),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::UnbalancedPanel(_)), "{err}");
        assert!(err.to_string().contains("period 2"));
    }

    #[test]
    fn rejects_uneven_time_step() {
        let err = Panel::from_records(&records(&[
            ("a", 1, 1.0),
            ("a", 2, 2.0),
            ("a", 4, 3.0),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::NonMonotonicTime(_)), "{err}");
    }

    #[test]
    fn rejects_non_finite_outcome() {
        let err = Panel::from_records(&records(&[
            ("a", 1, 1.0),
            ("a", 2, f64::NAN),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn rejects_single_period() {
        let err = Panel::from_records(&records(&[("a", 1, 1.0), ("b", 1, 2.0)])).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn treatment_partitions_index() {
        let p = small_panel();
        let spec = TreatmentSpec::new("a", 3);
        spec.validate(&p).unwrap();
        assert_eq!(spec.pre_len(&p), 2);
        assert_eq!(spec.post_len(&p), 1);

        // Treatment period between grid points still partitions cleanly.
        let spec = TreatmentSpec::new("a", 2);
        assert_eq!(spec.pre_len(&p), 1);
        assert_eq!(spec.post_len(&p), 2);
    }

    #[test]
    fn treatment_validation_errors() {
        let p = small_panel();
        assert!(TreatmentSpec::new("zzz", 2).validate(&p).is_err());
        // No pre-window.
        assert!(TreatmentSpec::new("a", 1).validate(&p).is_err());
        // No post-window.
        assert!(TreatmentSpec::new("a", 99).validate(&p).is_err());
    }

    #[test]
    fn record_json_round_trip() {
        let r = PanelRecord { unit_id: "acapulco".into(), period: 202310, outcome: 12.5 };
        let json = serde_json::to_string(&r).unwrap();
        let back: PanelRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
