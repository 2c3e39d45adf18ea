//! Donor-pool selection.
//!
//! Filters the panel's units down to those eligible to receive weight:
//! the treated unit is always excluded, caller-listed units are excluded
//! for contamination control (an explicit list, never inferred), and the
//! pre-treatment window must clear a configured floor.

use serde::{Deserialize, Serialize};

use sc_core::{Error, Panel, Result, TreatmentSpec};

/// Donor-pool filtering parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorSpec {
    /// Minimum number of pre-treatment periods required to fit weights.
    pub min_pre_periods: usize,
    /// Units excluded by the caller (e.g. neighbours plausibly hit by the
    /// same intervention). Unknown names are ignored.
    pub excluded_units: Vec<String>,
}

impl Default for DonorSpec {
    fn default() -> Self {
        Self { min_pre_periods: 6, excluded_units: Vec::new() }
    }
}

/// Units eligible to receive weight, in canonical panel order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorPool {
    units: Vec<String>,
}

impl DonorPool {
    /// Donor unit ids in canonical order.
    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Number of donors.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the pool is empty. A validated pool never is; this exists
    /// for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Whether the pool contains the given unit.
    pub fn contains(&self, unit_id: &str) -> bool {
        self.units.iter().any(|u| u == unit_id)
    }
}

/// Select the donor pool for a treated unit.
///
/// In a validated balanced panel every remaining unit automatically has a
/// complete pre-treatment history, so the per-unit history requirement
/// reduces to the shared pre-window length against the configured floor.
pub fn select_donors(
    panel: &Panel,
    treatment: &TreatmentSpec,
    spec: &DonorSpec,
) -> Result<DonorPool> {
    treatment.validate(panel)?;

    let pre_len = treatment.pre_len(panel);
    if pre_len < spec.min_pre_periods {
        return Err(Error::InsufficientPrePeriods(format!(
            "pre-treatment window has {pre_len} periods, floor is {}",
            spec.min_pre_periods
        )));
    }

    let units: Vec<String> = panel
        .units()
        .iter()
        .filter(|u| **u != treatment.treated_unit)
        .filter(|u| !spec.excluded_units.iter().any(|x| x == *u))
        .cloned()
        .collect();

    if units.is_empty() {
        return Err(Error::EmptyDonorPool(format!(
            "no eligible donors for treated unit '{}' ({} units excluded by caller)",
            treatment.treated_unit,
            spec.excluded_units.len()
        )));
    }

    Ok(DonorPool { units })
}
