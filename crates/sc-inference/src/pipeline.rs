//! End-to-end synthetic-control pipeline.
//!
//! Wires the stages in order — donor selection → weight fit →
//! counterfactual projection → effect estimation — for the primary run,
//! and fans the same pipeline out across the donor pool for placebo
//! inference. Placebo runs are independent reads of the immutable panel,
//! so they execute in parallel with no shared state; the ranking waits for
//! every non-skipped run before computing the p-value.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use sc_core::{Error, Panel, Result, TreatmentSpec};

use crate::counterfactual::{project, Counterfactual, WeightVector};
use crate::donor::{select_donors, DonorPool, DonorSpec};
use crate::effect::{estimate, EffectEstimate};
use crate::placebo::{aggregate, PlaceboDistribution, SkippedUnit, UnitFitRatio};
use crate::solver::{QpWeightSolver, SolverConfig, WeightSolver};

/// Tunables for a full estimation run.
#[derive(Debug, Clone)]
pub struct ScConfig {
    /// Donor-pool filtering (pre-window floor, caller exclusions).
    pub donor: DonorSpec,
    /// Deterministic-solver settings (ridge, conditioning, tolerances).
    pub solver: SolverConfig,
    /// RMSPE-pre below this marks a placebo fit as degenerate.
    pub degenerate_rmspe_epsilon: f64,
    /// Optional post-window horizon (inclusive). `None` = full index.
    pub post_end: Option<i64>,
}

impl Default for ScConfig {
    /// Defaults: floor 6 pre-periods, λ = 1e-6, condition threshold 1e8,
    /// degeneracy epsilon 1e-8, full post window.
    fn default() -> Self {
        Self {
            donor: DonorSpec::default(),
            solver: SolverConfig::default(),
            degenerate_rmspe_epsilon: 1e-8,
            post_end: None,
        }
    }
}

/// Per-donor credible interval (posterior solvers only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredibleInterval {
    /// Donor unit.
    pub unit: String,
    /// Lower interval bound.
    pub lower: f64,
    /// Upper interval bound.
    pub upper: f64,
}

/// Complete primary-run output: weights, counterfactual, effects, and the
/// solver diagnostics the caller should surface.
#[derive(Debug, Clone, Serialize)]
pub struct ScFit {
    /// The treatment specification this fit answers.
    pub treatment: TreatmentSpec,
    /// Donor pool the weights are defined over.
    pub donor_pool: DonorPool,
    /// Fitted simplex weights.
    pub weights: WeightVector,
    /// Synthetic trajectory over the full index.
    pub counterfactual: Counterfactual,
    /// Gap table and scalar summaries.
    pub effect: EffectEstimate,
    /// Which solver produced the weights ("qp" or "bayes").
    pub solver: String,
    /// Pre-window sum of squared residuals at the fitted weights.
    pub objective: f64,
    /// Solver iterations (or posterior draws).
    pub n_iter: usize,
    /// Whether the solver converged before its cap.
    pub converged: bool,
    /// Per-donor credible intervals, when the solver is posterior-based.
    pub credible_intervals: Option<Vec<CredibleInterval>>,
    /// Recoverable diagnostics (conditioning, short pre-window, sampler).
    pub warnings: Vec<String>,
}

/// Synthetic-control estimator: configuration plus a weight solver.
pub struct SyntheticControl {
    config: ScConfig,
    solver: Box<dyn WeightSolver>,
}

impl SyntheticControl {
    /// Estimator with the deterministic QP solver.
    pub fn new(config: ScConfig) -> Self {
        let solver = Box::new(QpWeightSolver::new(config.solver.clone()));
        Self { config, solver }
    }

    /// Estimator with all defaults.
    pub fn with_defaults() -> Self {
        Self::new(ScConfig::default())
    }

    /// Estimator with a caller-chosen solver (e.g. the Bayesian variant).
    /// Downstream stages are agnostic to which solver produced the weights.
    pub fn with_solver(config: ScConfig, solver: Box<dyn WeightSolver>) -> Self {
        Self { config, solver }
    }

    /// Access the configuration.
    pub fn config(&self) -> &ScConfig {
        &self.config
    }

    /// Run the primary pipeline for the treated unit.
    pub fn fit(&self, panel: &Panel, treatment: &TreatmentSpec) -> Result<ScFit> {
        self.fit_with(panel, treatment, &self.config.donor)
    }

    fn fit_with(
        &self,
        panel: &Panel,
        treatment: &TreatmentSpec,
        donor_spec: &DonorSpec,
    ) -> Result<ScFit> {
        let pool = select_donors(panel, treatment, donor_spec)?;

        let pre_len = treatment.pre_len(panel);
        let treated_series = panel.series(&treatment.treated_unit)?;
        let y_pre = &treated_series[..pre_len];
        let donors_pre = donor_matrix(panel, &pool, pre_len)?;

        let fit = self.solver.fit(y_pre, &donors_pre)?;

        let mut warnings = fit.warnings.clone();
        if pre_len < 2 * pool.len() {
            warnings.push(format!(
                "pre-treatment window ({pre_len} periods) is shorter than twice the donor pool \
                 ({} units): weights may overfit the pre-period",
                pool.len()
            ));
        }

        let weights = WeightVector::new(pool.units().to_vec(), fit.weights.clone())?;
        let counterfactual = project(&weights, panel)?;
        let effect = estimate(
            treated_series,
            &counterfactual.synthetic,
            panel.periods(),
            treatment.treatment_period,
            self.config.post_end,
        )?;

        let credible_intervals = fit.credible_intervals.as_ref().map(|ivs| {
            pool.units()
                .iter()
                .zip(ivs)
                .map(|(unit, &(lower, upper))| CredibleInterval {
                    unit: unit.clone(),
                    lower,
                    upper,
                })
                .collect()
        });

        Ok(ScFit {
            treatment: treatment.clone(),
            donor_pool: pool,
            weights,
            counterfactual,
            effect,
            solver: self.solver.name().to_string(),
            objective: fit.objective,
            n_iter: fit.n_iter,
            converged: fit.converged,
            credible_intervals,
            warnings,
        })
    }

    /// Placebo inference: rerun the pipeline once per donor as
    /// pseudo-treated and rank the real treated unit's fit ratio.
    ///
    /// Errors in the primary run abort; errors inside a placebo iteration
    /// skip that unit and degrade the sample size instead.
    pub fn infer(&self, panel: &Panel, treatment: &TreatmentSpec) -> Result<PlaceboDistribution> {
        let primary = self.fit(panel, treatment)?;
        let treated_stat =
            UnitFitRatio::from_effect(treatment.treated_unit.clone(), &primary.effect);

        // Placebo pools must keep excluding the real treated unit.
        let mut placebo_spec = self.config.donor.clone();
        placebo_spec.excluded_units.push(treatment.treated_unit.clone());

        let outcomes: Vec<std::result::Result<UnitFitRatio, SkippedUnit>> = primary
            .donor_pool
            .units()
            .par_iter()
            .map(|d| {
                let pseudo = TreatmentSpec::new(d.clone(), treatment.treatment_period);
                match self.fit_with(panel, &pseudo, &placebo_spec) {
                    Ok(f) => Ok(UnitFitRatio::from_effect(d.clone(), &f.effect)),
                    Err(e) => Err(SkippedUnit { unit: d.clone(), reason: e.to_string() }),
                }
            })
            .collect();

        let mut placebos = Vec::with_capacity(outcomes.len());
        let mut skipped = Vec::new();
        for o in outcomes {
            match o {
                Ok(stat) => placebos.push(stat),
                Err(skip) => skipped.push(skip),
            }
        }

        Ok(aggregate(treated_stat, placebos, skipped, self.config.degenerate_rmspe_epsilon))
    }
}

/// Pre-window donor matrix, one column per pool member.
fn donor_matrix(panel: &Panel, pool: &DonorPool, pre_len: usize) -> Result<DMatrix<f64>> {
    let rows: Vec<usize> = pool
        .units()
        .iter()
        .map(|d| {
            panel
                .unit_index(d)
                .ok_or_else(|| Error::Validation(format!("donor '{d}' is not in the panel")))
        })
        .collect::<Result<_>>()?;
    Ok(DMatrix::from_fn(pre_len, rows.len(), |t, j| panel.outcome_at(rows[j], t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::WeightFit;
    use sc_core::PanelRecord;

    fn panel(series: &[(&str, Vec<f64>)]) -> Panel {
        let mut rows = Vec::new();
        for (u, ys) in series {
            for (t, &y) in ys.iter().enumerate() {
                rows.push(PanelRecord { unit_id: u.to_string(), period: t as i64 + 1, outcome: y });
            }
        }
        Panel::from_records(&rows).unwrap()
    }

    /// Solver stub that must never be reached.
    struct UnreachableSolver;

    impl WeightSolver for UnreachableSolver {
        fn fit(&self, _y: &[f64], _x: &DMatrix<f64>) -> Result<WeightFit> {
            panic!("solver must not run when donor selection fails");
        }
        fn name(&self) -> &str {
            "unreachable"
        }
    }

    #[test]
    fn empty_pool_aborts_before_the_solver() {
        let p = panel(&[
            ("treated", (1..=10).map(|t| t as f64).collect()),
            ("x", (1..=10).map(|t| t as f64 + 1.0).collect()),
        ]);
        let config = ScConfig {
            donor: DonorSpec { min_pre_periods: 4, excluded_units: vec!["x".into()] },
            ..ScConfig::default()
        };
        let sc = SyntheticControl::with_solver(config, Box::new(UnreachableSolver));
        let err = sc.fit(&p, &TreatmentSpec::new("treated", 8)).unwrap_err();
        assert!(matches!(err, Error::EmptyDonorPool(_)), "{err}");
    }

    #[test]
    fn fit_produces_consistent_bundle() {
        let p = panel(&[
            ("treated", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]),
            ("twin", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]),
            ("noise", vec![5.0, 1.0, 8.0, 2.0, 9.0, 3.0, 7.0, 4.0, 6.0, 2.0]),
        ]);
        let config = ScConfig {
            donor: DonorSpec { min_pre_periods: 6, ..Default::default() },
            ..ScConfig::default()
        };
        let sc = SyntheticControl::new(config);
        let fit = sc.fit(&p, &TreatmentSpec::new("treated", 8)).unwrap();

        assert_eq!(fit.solver, "qp");
        assert_eq!(fit.donor_pool.units(), &["noise".to_string(), "twin".to_string()]);
        assert_eq!(fit.counterfactual.periods.len(), 10);
        assert_eq!(fit.effect.rows.len(), 10);
        assert!(fit.weights.get("twin").unwrap() > 0.99);
        assert!(fit.credible_intervals.is_none());
        // 7 pre-periods > 2×2 donors: no overfit warning expected beyond
        // solver diagnostics.
        assert!(fit.effect.rmspe_pre < 1e-4);
    }

    #[test]
    fn short_pre_window_warns() {
        let p = panel(&[
            ("t", (1..=14).map(|t| t as f64).collect()),
            ("a", (1..=14).map(|t| t as f64 + 0.5).collect()),
            ("b", (1..=14).map(|t| 15.0 - t as f64).collect()),
            ("c", (1..=14).map(|t| (t as f64) * 0.5).collect()),
            ("d", (1..=14).map(|t| 2.0 + t as f64).collect()),
        ]);
        let sc = SyntheticControl::with_defaults();
        // 6 pre-periods < 2×4 donors.
        let fit = sc.fit(&p, &TreatmentSpec::new("t", 7)).unwrap();
        assert!(
            fit.warnings.iter().any(|w| w.contains("twice the donor pool")),
            "warnings = {:?}",
            fit.warnings
        );
    }

    #[test]
    fn placebo_failures_are_skipped_not_fatal() {
        // With a single donor, that donor's own placebo run has an empty
        // pool; inference must record the skip and still produce a result.
        let p = panel(&[
            ("t", (1..=10).map(|t| t as f64).collect()),
            ("only", (1..=10).map(|t| t as f64 + 0.5).collect()),
        ]);
        let sc = SyntheticControl::with_defaults();
        let dist = sc.infer(&p, &TreatmentSpec::new("t", 8)).unwrap();

        assert!(dist.placebos.is_empty());
        assert_eq!(dist.skipped.len(), 1);
        assert_eq!(dist.skipped[0].unit, "only");
        assert!(dist.skipped[0].reason.contains("empty donor pool"), "{}", dist.skipped[0].reason);
        assert_eq!(dist.n_ranked, 1);
        assert!((dist.p_value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fit_serializes_for_the_dashboard_contract() {
        let p = panel(&[
            ("t", (1..=10).map(|t| t as f64).collect()),
            ("a", (1..=10).map(|t| t as f64 + 0.5).collect()),
            ("b", (1..=10).map(|t| 11.0 - t as f64).collect()),
        ]);
        let sc = SyntheticControl::with_defaults();
        let fit = sc.fit(&p, &TreatmentSpec::new("t", 8)).unwrap();
        let dist = sc.infer(&p, &TreatmentSpec::new("t", 8)).unwrap();

        let json = serde_json::to_value(&fit).unwrap();
        assert!(json.get("weights").is_some());
        assert!(json.get("counterfactual").is_some());
        assert!(json.get("effect").is_some());

        let json = serde_json::to_value(&dist).unwrap();
        assert!(json.get("p_value").is_some());
        assert!(json.get("skipped").is_some());
    }

    #[test]
    fn infer_runs_every_placebo() {
        let p = panel(&[
            ("t", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0, 0.0, 0.0, 0.0]),
            ("a", vec![1.1, 2.1, 3.1, 4.1, 5.1, 6.1, 7.1, 8.1, 9.1, 10.1]),
            ("b", vec![0.9, 1.9, 2.9, 3.9, 4.9, 5.9, 6.9, 7.9, 8.9, 9.9]),
            ("c", vec![1.0, 2.2, 2.8, 4.2, 4.8, 6.2, 6.8, 8.2, 8.8, 10.2]),
        ]);
        let sc = SyntheticControl::with_defaults();
        let dist = sc.infer(&p, &TreatmentSpec::new("t", 7)).unwrap();

        assert_eq!(dist.placebos.len() + dist.skipped.len(), 3);
        // The treated unit collapses post-treatment while donors keep
        // trending: it must be the most extreme unit.
        assert_eq!(dist.rank, 1);
        assert!(dist.p_value <= 0.5);
    }
}
