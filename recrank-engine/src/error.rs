//! Error types for recrank-engine
//!
//! Unknown users/items are not errors (see [`crate::model::UnknownEntity`]),
//! and a training attempt skipped because another one is running is not
//! surfaced at all.

use thiserror::Error;

/// Boxed error used at the seams to external collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for recrank-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Prediction requested before the first successful training run
    #[error("Model not ready: no training run has completed yet")]
    ModelNotReady,

    /// Rating retrieval failed; aborts only the current training attempt
    #[error("Data source error: {0}")]
    DataSource(#[source] BoxError),

    /// The trainer rejected the ratings or failed numerically
    #[error("Training error: {0}")]
    Training(String),

    /// The training task panicked or was cancelled
    #[error("Training task failed: {0}")]
    TaskFailed(String),

    /// Invalid schedule or trainer configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine constructed outside a Tokio runtime
    #[error("No Tokio runtime available")]
    NoRuntime,
}

/// Convenience Result type using recrank-engine Error
pub type Result<T> = std::result::Result<T, Error>;
