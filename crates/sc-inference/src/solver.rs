//! Weight fitting over the probability simplex.
//!
//! The synthetic-control weights solve
//!
//! ```text
//! minimize   ‖y_pre − X_pre·w‖²  +  λ‖w‖²
//! subject to w_j ≥ 0,  Σ_j w_j = 1
//! ```
//!
//! a convex quadratic program whose feasible set is the probability
//! simplex. The objective value is unique; the minimizer need not be when
//! donors are collinear over the pre-window, so a small ridge λ (default
//! 1e-6) selects the minimum-L2-norm solution among ties. The solver is a
//! purpose-built projected-gradient descent with exact Euclidean simplex
//! projection — clipping-and-renormalizing a generic unconstrained solution
//! would break the optimality guarantee.
//!
//! [`WeightSolver`] is the polymorphic seam: the deterministic QP here and
//! the posterior-sampling variant in [`crate::bayes`] share one contract,
//! so everything downstream is agnostic to which produced the weights.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use sc_core::{Error, Result};

/// Configuration for the deterministic QP weight solver.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Ridge penalty λ. Small by default: it breaks ties toward the
    /// minimum-norm solution without biasing the primary fit.
    pub ridge_lambda: f64,
    /// Condition-number threshold above which the pre-treatment donor
    /// matrix is reported as ill-conditioned (warning, never a failure).
    pub condition_threshold: f64,
    /// Convergence tolerance on the sup-norm weight change per iteration.
    pub tol: f64,
    /// Iteration cap for the projected-gradient loop.
    pub max_iter: usize,
    /// Tolerance ε for the Σw = 1 invariant check on the returned weights.
    pub weight_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            ridge_lambda: 1e-6,
            condition_threshold: 1e8,
            tol: 1e-10,
            max_iter: 50_000,
            weight_tolerance: 1e-6,
        }
    }
}

/// Result of a weight fit.
///
/// `weights` is aligned with the donor-pool order the caller used to build
/// the donor matrix columns. `objective` is the pre-window sum of squared
/// residuals at the returned weights (ridge term excluded, so values are
/// comparable across solvers and λ settings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightFit {
    /// Fitted weights, one per donor column.
    pub weights: Vec<f64>,
    /// ‖y_pre − X_pre·w‖² at the returned weights.
    pub objective: f64,
    /// Iterations used (projected-gradient steps, or posterior draws).
    pub n_iter: usize,
    /// Whether the iteration converged before the cap.
    pub converged: bool,
    /// Recoverable diagnostics (ill-conditioning, sampler acceptance).
    pub warnings: Vec<String>,
    /// Equal-tailed credible intervals per donor, when produced by a
    /// posterior-sampling solver.
    pub credible_intervals: Option<Vec<(f64, f64)>>,
}

/// Polymorphic weight-fitting interface.
///
/// `y_pre` holds the treated unit's pre-treatment outcomes (length T);
/// `donors_pre` is the T×J matrix of donor pre-treatment outcomes, one
/// column per donor. Implementations must return weights satisfying the
/// simplex invariants (Σw = 1 within tolerance, w ≥ −1e-9).
pub trait WeightSolver: Send + Sync {
    /// Fit the simplex-constrained weights.
    fn fit(&self, y_pre: &[f64], donors_pre: &DMatrix<f64>) -> Result<WeightFit>;

    /// Solver name (e.g. "qp", "bayes"), echoed into run outputs.
    fn name(&self) -> &str;
}

/// Exact Euclidean projection onto the probability simplex.
///
/// Sort-based algorithm: find the largest `rho` such that
/// `u_rho − (Σ_{i≤rho} u_i − 1)/rho > 0` over the descending-sorted input,
/// then shift and clip. O(n log n).
pub fn project_simplex(v: &[f64]) -> Vec<f64> {
    let n = v.len();
    if n == 1 {
        return vec![1.0];
    }

    let mut u = v.to_vec();
    u.sort_by(|a, b| b.partial_cmp(a).unwrap());

    let mut cumsum = 0.0;
    let mut theta = 0.0;
    for (i, &ui) in u.iter().enumerate() {
        cumsum += ui;
        let t = (cumsum - 1.0) / (i as f64 + 1.0);
        if ui - t > 0.0 {
            theta = t;
        }
    }

    v.iter().map(|&vi| (vi - theta).max(0.0)).collect()
}

/// Check the simplex invariants on solver output.
///
/// The simplex is always feasible, so a violation here is a solver bug and
/// is surfaced as [`Error::Solver`] rather than a user-facing condition.
pub(crate) fn check_simplex(weights: &[f64], tolerance: f64) -> Result<()> {
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > tolerance {
        return Err(Error::Solver(format!(
            "weights sum to {sum:.9} (tolerance {tolerance:.1e})"
        )));
    }
    if let Some(w) = weights.iter().find(|w| **w < -1e-9) {
        return Err(Error::Solver(format!("negative weight {w:.3e}")));
    }
    Ok(())
}

/// Deterministic projected-gradient QP solver.
pub struct QpWeightSolver {
    config: SolverConfig,
}

impl QpWeightSolver {
    /// Create a solver with the given configuration.
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Create a solver with default tolerances.
    pub fn with_defaults() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl WeightSolver for QpWeightSolver {
    fn fit(&self, y_pre: &[f64], donors_pre: &DMatrix<f64>) -> Result<WeightFit> {
        let t = donors_pre.nrows();
        let j = donors_pre.ncols();
        if y_pre.is_empty() {
            return Err(Error::Validation("y_pre must be non-empty".into()));
        }
        if t != y_pre.len() {
            return Err(Error::Validation(format!(
                "donor matrix has {t} rows, y_pre has {} periods",
                y_pre.len()
            )));
        }
        if j == 0 {
            return Err(Error::Validation("donor matrix must have at least one column".into()));
        }

        let y = DVector::from_column_slice(y_pre);
        let gram = donors_pre.transpose() * donors_pre;
        let xty = donors_pre.transpose() * &y;

        let mut warnings = Vec::new();

        // Conditioning of X'X via SVD. Above the threshold the ridge (which
        // is part of the objective in all cases) is reported as the active
        // regularizer; the solve itself never fails on conditioning.
        let svd = gram.clone().svd(false, false);
        let s_max = svd.singular_values.iter().fold(0.0_f64, |a, &b| a.max(b));
        let s_min = svd.singular_values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        if s_min <= 0.0 {
            warnings.push(format!(
                "donor pre-treatment matrix is rank-deficient: ridge λ={:.1e} regularizes the solve",
                self.config.ridge_lambda
            ));
        } else {
            let cond = s_max / s_min;
            if cond > self.config.condition_threshold {
                warnings.push(format!(
                    "donor pre-treatment matrix condition number = {cond:.1e}: ridge λ={:.1e} regularizes the solve",
                    self.config.ridge_lambda
                ));
            }
        }

        let lambda = self.config.ridge_lambda;
        let mut gram_r = gram;
        for i in 0..j {
            gram_r[(i, i)] += lambda;
        }

        // Step 1/L, L = largest eigenvalue of the ridge-augmented Gram
        // matrix: monotone descent, the fit never ends up worse than its
        // equal-weight starting point.
        let lipschitz = s_max + lambda;
        let step = if lipschitz > 0.0 { 1.0 / lipschitz } else { 1.0 };

        let mut w = DVector::from_element(j, 1.0 / j as f64);
        let mut n_iter = 0;
        let mut converged = false;

        while n_iter < self.config.max_iter {
            n_iter += 1;
            let grad = &gram_r * &w - &xty;
            let proposal: Vec<f64> =
                (0..j).map(|k| w[k] - step * grad[k]).collect();
            let projected = project_simplex(&proposal);

            let delta = projected
                .iter()
                .zip(w.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0_f64, f64::max);

            w = DVector::from_vec(projected);
            if delta < self.config.tol {
                converged = true;
                break;
            }
        }

        let weights: Vec<f64> = w.iter().copied().collect();
        check_simplex(&weights, self.config.weight_tolerance)?;

        let resid = &y - donors_pre * &w;
        let objective = resid.iter().map(|r| r * r).sum();

        Ok(WeightFit {
            weights,
            objective,
            n_iter,
            converged,
            warnings,
            credible_intervals: None,
        })
    }

    fn name(&self) -> &str {
        "qp"
    }
}
