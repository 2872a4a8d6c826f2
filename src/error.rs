//! Error types for the meta-learning pipeline.

use thiserror::Error;

/// Errors surfaced by meta-training
///
/// All variants are fatal precondition or shape violations detected before
/// any gradient computation runs. Per-parameter undefined gradients are not
/// errors; the optimizer simply leaves those parameters untouched.
#[derive(Error, Debug, Clone)]
pub enum MetaError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("batch size mismatch: {inputs} input rows vs {labels} label rows")]
    BatchSizeMismatch { inputs: usize, labels: usize },

    #[error("{what} dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("empty meta-batch: at least one task is required")]
    EmptyMetaBatch,

    #[error("weight store mismatch: {0}")]
    StoreMismatch(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MetaError>;
