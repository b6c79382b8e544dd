//! # recrank Engine (recrank-engine)
//!
//! Serves rating predictions from a collaborative-filtering model that is
//! retrained in the background without blocking readers.
//!
//! **Architecture:** Scheduler → TrainingGuard → RatingSource → Trainer →
//! ModelRegistry (publish) → PredictionService (read). Predictions only ever
//! touch the registry.

pub mod als;
pub mod engine;
pub mod error;
pub mod guard;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod trainer;

pub use engine::RecommendationEngine;
pub use error::{BoxError, Error, Result};
pub use model::{Model, UnknownEntity};
pub use pipeline::TrainingOutcome;
pub use recrank_common::Rating;
pub use scheduler::ScheduleConfig;
pub use service::{Prediction, PredictionService};
pub use source::RatingSource;
pub use trainer::Trainer;
