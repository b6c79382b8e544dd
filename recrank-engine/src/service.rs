//! Prediction service
//!
//! Read-side façade over the registry. Never touches the scheduler or the
//! trainer, and never waits on a training session.

use crate::error::{Error, Result};
use crate::registry::ModelRegistry;
use std::sync::Arc;
use tracing::trace;

/// Prediction together with the version of the model that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// `None` when the user or item is unknown to the model
    pub value: Option<f64>,
    pub version: u64,
}

/// Cheap-to-clone handle for answering predictions
#[derive(Debug, Clone)]
pub struct PredictionService {
    registry: Arc<ModelRegistry>,
}

impl PredictionService {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Predicted rating for `(user_id, item_id)`
    ///
    /// Returns [`Error::ModelNotReady`] before the first successful training
    /// run, and `Ok(None)` when either identifier is unknown to the model.
    pub fn predict(&self, user_id: i32, item_id: i32) -> Result<Option<f64>> {
        self.predict_with_version(user_id, item_id).map(|p| p.value)
    }

    /// Like [`predict`](Self::predict), also reporting the model version used
    pub fn predict_with_version(&self, user_id: i32, item_id: i32) -> Result<Prediction> {
        if !self.registry.is_ready() {
            return Err(Error::ModelNotReady);
        }
        let snapshot = self.registry.read_snapshot().ok_or(Error::ModelNotReady)?;

        let value = match snapshot.model.predict(user_id, item_id) {
            Ok(value) => Some(value),
            Err(unknown) => {
                trace!(user_id, item_id, version = snapshot.version, "No prediction: {}", unknown);
                None
            }
        };

        Ok(Prediction {
            value,
            version: snapshot.version,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.registry.is_ready()
    }

    pub fn current_version(&self) -> u64 {
        self.registry.current_version()
    }
}
