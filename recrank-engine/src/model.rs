//! Trained model abstraction

use std::fmt;
use thiserror::Error;

/// Identifier the model has never seen during training
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownEntity {
    #[error("unknown user {0}")]
    User(i32),
    #[error("unknown item {0}")]
    Item(i32),
}

/// Immutable trained artifact answering `(user, item)` rating predictions
///
/// Implementations are never mutated after construction; retraining builds a
/// new instance that replaces the old one in the registry.
pub trait Model: Send + Sync + fmt::Debug {
    /// Predicted rating, or which identifier is unknown to the model
    fn predict(&self, user_id: i32, item_id: i32) -> Result<f64, UnknownEntity>;
}
