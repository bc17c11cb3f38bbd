//! Memory-usage estimation.
//!
//! - [`plan`]: gpu-layers resolution and offload sweeps
//! - [`memory`]: the closed-formula estimator producing [`memory::MemoryUsage`]
//!
//! Estimation is a pure function of (parsed file, configuration):
//! identical inputs produce identical reports, and it never re-reads
//! tensor bytes.

pub mod memory;
pub mod plan;

use thiserror::Error;

use crate::view::ViewError;

#[derive(Error, Debug)]
pub enum EstimateError {
    #[error("unsupported architecture '{0}'")]
    UnsupportedArchitecture(String),

    #[error(transparent)]
    View(#[from] ViewError),
}
