//! Trainer abstraction
//!
//! A trainer turns a rating collection into a new immutable [`Model`]. It may
//! take seconds to minutes and always runs on the blocking thread pool.

use crate::error::BoxError;
use crate::model::Model;
use recrank_common::Rating;
use std::sync::Arc;

/// Pure function from ratings to a trained model
///
/// Never called with an empty rating slice.
pub trait Trainer: Send + Sync + 'static {
    fn train(&self, ratings: &[Rating]) -> Result<Arc<dyn Model>, BoxError>;

    /// Release computation resources owned by the trainer
    ///
    /// Called exactly once, from [`crate::RecommendationEngine::shutdown`].
    fn release(&self) {}
}
