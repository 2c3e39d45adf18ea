//! # sc-inference
//!
//! Synthetic-control estimation for a single intervention on one unit of
//! a balanced panel:
//!
//! - donor-pool selection with explicit contamination exclusions
//! - simplex-constrained weight fitting (deterministic QP or Bayesian
//!   posterior sampling behind one [`solver::WeightSolver`] trait)
//! - counterfactual projection with frozen weights
//! - per-period and cumulative effect estimation
//! - placebo/permutation inference with rank-based p-values
//!
//! The pipeline is batch and referentially transparent: nothing mutates
//! the panel, and placebo iterations parallelize freely.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Posterior-sampling weight solver (Metropolis over the simplex).
pub mod bayes;
/// Counterfactual projection from frozen weights.
pub mod counterfactual;
/// Donor-pool selection.
pub mod donor;
/// Effect estimation and fit diagnostics.
pub mod effect;
/// Pipeline orchestration (fit + infer entry points).
pub mod pipeline;
/// Placebo-inference statistics and aggregation.
pub mod placebo;
/// Weight-solver trait and the deterministic QP implementation.
pub mod solver;

pub use bayes::{BayesConfig, BayesWeightSolver};
pub use counterfactual::{project, Counterfactual, WeightVector};
pub use donor::{select_donors, DonorPool, DonorSpec};
pub use effect::{estimate, EffectEstimate, EffectRow};
pub use pipeline::{CredibleInterval, ScConfig, ScFit, SyntheticControl};
pub use placebo::{PlaceboDistribution, SkippedUnit, UnitFitRatio};
pub use solver::{project_simplex, QpWeightSolver, SolverConfig, WeightFit, WeightSolver};
