//! Read-only projections over the parsed metadata.
//!
//! - [`model`]: the model card: name, quantization label, size, BPW
//! - [`architecture`]: per-architecture hyperparameters
//! - [`tokenizer`]: tokenizer summary and special-token ids
//!
//! Projection never re-reads the file; a missing or mistyped key fails
//! here, not at parse time, and leaves the parsed file usable.

pub mod architecture;
pub mod model;
pub mod tokenizer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("architecture '{arch}' is missing metadata key '{key}'")]
    MissingMetadata { arch: String, key: String },

    #[error("metadata key '{key}' has an unexpected type")]
    TypeMismatch { key: String },
}
