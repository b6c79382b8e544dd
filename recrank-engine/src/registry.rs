//! Model registry
//!
//! Holds the currently served model together with its version. Model and
//! version live under one reader/writer lock so a snapshot always pairs a
//! model with the version it was published as. The lock is held only for
//! the pointer swap on publish and the `Arc` clone on read, never for
//! training.

use crate::model::Model;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

#[derive(Debug, Default)]
struct Published {
    model: Option<Arc<dyn Model>>,
    version: u64,
}

/// Self-consistent `(model, version)` pair
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub model: Arc<dyn Model>,
    pub version: u64,
}

/// Current model, monotonically increasing version, readiness flag
///
/// `ready` is true iff a model has been published at least once. `version`
/// increments by exactly one per publish.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    published: RwLock<Published>,
    ready: AtomicBool,
}

impl ModelRegistry {
    /// Create an empty registry (`ready == false`, version 0)
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the served model and return its new version
    pub fn publish(&self, model: Arc<dyn Model>) -> u64 {
        let version = {
            let mut published = self.write();
            published.model = Some(model);
            published.version += 1;
            self.ready.store(true, Ordering::Release);
            published.version
        };
        info!(version, "Published new model");
        version
    }

    /// Current model and its version, or `None` before the first publish
    pub fn read_snapshot(&self) -> Option<ModelSnapshot> {
        let published = self.read();
        published.model.as_ref().map(|model| ModelSnapshot {
            model: Arc::clone(model),
            version: published.version,
        })
    }

    /// Lock-free readiness check
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Version of the served model (0 before the first publish)
    pub fn current_version(&self) -> u64 {
        self.read().version
    }

    // Publish replaces a single pointer, so a poisoned lock never guards
    // half-written state.
    fn read(&self) -> RwLockReadGuard<'_, Published> {
        self.published.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Published> {
        self.published.write().unwrap_or_else(PoisonError::into_inner)
    }
}
