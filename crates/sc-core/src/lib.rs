//! # sc-core
//!
//! Shared data model for the synthetic-control workspace:
//!
//! - [`Panel`] — validated, balanced unit×time outcome grid
//! - [`TreatmentSpec`] — treated unit + intervention period
//! - [`Error`] / [`Result`] — the workspace-wide error taxonomy
//!
//! Estimation lives in `sc-inference`; this crate is deliberately free of
//! numerics so every consumer shares one definition of "a valid panel".

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod panel;

pub use error::{Error, Result};
pub use panel::{Panel, PanelRecord, TreatmentSpec};

/// Crate version (mirrored into CLI `version` output).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
