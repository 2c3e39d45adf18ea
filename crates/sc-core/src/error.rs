//! Error types for the synthetic-control workspace.

use thiserror::Error;

/// Workspace error type.
///
/// Variants map onto the failure classes of the estimation pipeline:
/// panel-shape violations are fatal and must be fixed upstream, selection
/// failures are fatal for a primary run but skippable inside placebo
/// iterations, and `Solver` marks an internal invariant violation rather
/// than a user-facing condition.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A (unit, period) cell is missing from the panel grid.
    #[error("unbalanced panel: {0}")]
    UnbalancedPanel(String),

    /// The same (unit, period) key appears more than once.
    #[error("duplicate panel key: {0}")]
    DuplicateKey(String),

    /// The time index is not strictly increasing with a uniform step.
    #[error("non-monotonic time index: {0}")]
    NonMonotonicTime(String),

    /// No units remain after donor-pool filtering.
    #[error("empty donor pool: {0}")]
    EmptyDonorPool(String),

    /// The pre-treatment window is shorter than the configured floor.
    #[error("insufficient pre-treatment history: {0}")]
    InsufficientPrePeriods(String),

    /// Internal solver defect (the simplex constraint set is always
    /// feasible, so reaching this indicates a bug, not bad input).
    #[error("solver defect: {0}")]
    Solver(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let e = Error::UnbalancedPanel("unit 'X' missing period 3".into());
        assert!(e.to_string().contains("unit 'X'"));

        let e = Error::EmptyDonorPool("all candidates excluded".into());
        assert!(e.to_string().starts_with("empty donor pool"));
    }

    #[test]
    fn io_error_converts() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/sc-core-test")?)
        }
        assert!(matches!(read(), Err(Error::Io(_))));
    }
}
