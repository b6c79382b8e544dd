//! Training pipeline
//!
//! One launch = one training session: take the guard, then in a spawned task
//! fetch ratings, train and publish, record the outcome, release the guard.
//! Fetch and train run on the blocking pool; the caller never waits.
//!
//! Failures stay inside the session. They are logged, kept as the latest
//! outcome and broadcast as [`TrainingOutcome::Failed`]; they never reach
//! the scheduler or readers.

use crate::error::{Error, Result};
use crate::guard::TrainingGuard;
use crate::registry::ModelRegistry;
use crate::source::{fetch_ratings, RatingSource};
use crate::trainer::Trainer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the outcome broadcast channel
const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// Result of one training session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TrainingOutcome {
    /// A new model is being served
    Published {
        session_id: Uuid,
        version: u64,
        ratings: usize,
        elapsed_ms: u64,
        completed_at: DateTime<Utc>,
    },

    /// The source returned no ratings; the previous model keeps serving
    SkippedEmpty {
        session_id: Uuid,
        elapsed_ms: u64,
        completed_at: DateTime<Utc>,
    },

    /// Fetch, training or the task itself failed; the previous model keeps
    /// serving
    Failed {
        session_id: Uuid,
        error: String,
        elapsed_ms: u64,
        completed_at: DateTime<Utc>,
    },
}

impl TrainingOutcome {
    pub fn session_id(&self) -> Uuid {
        match self {
            TrainingOutcome::Published { session_id, .. }
            | TrainingOutcome::SkippedEmpty { session_id, .. }
            | TrainingOutcome::Failed { session_id, .. } => *session_id,
        }
    }

    /// Version published by this session, if any
    pub fn version(&self) -> Option<u64> {
        match self {
            TrainingOutcome::Published { version, .. } => Some(*version),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TrainingOutcome::Failed { .. })
    }
}

/// What a session did when it did not fail
enum SessionResult {
    Published { version: u64, ratings: usize },
    Empty,
}

/// Guard → fetch → train → publish
pub struct TrainingPipeline {
    source: Arc<dyn RatingSource>,
    trainer: Arc<dyn Trainer>,
    registry: Arc<ModelRegistry>,
    guard: Arc<TrainingGuard>,
    outcomes: broadcast::Sender<TrainingOutcome>,
    latest: watch::Sender<Option<TrainingOutcome>>,
    closed: AtomicBool,
    runtime: Handle,
}

impl TrainingPipeline {
    pub fn new(
        source: Arc<dyn RatingSource>,
        trainer: Arc<dyn Trainer>,
        registry: Arc<ModelRegistry>,
        runtime: Handle,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        let (latest, _) = watch::channel(None);
        Self {
            source,
            trainer,
            registry,
            guard: Arc::new(TrainingGuard::new()),
            outcomes,
            latest,
            closed: AtomicBool::new(false),
            runtime,
        }
    }

    /// Start a training session unless one is already running
    ///
    /// Returns immediately. `None` means the guard was busy and this attempt
    /// was skipped (expected, not an error), or the pipeline is closed.
    pub fn launch(&self) -> Option<JoinHandle<TrainingOutcome>> {
        let Some(permit) = self.guard.try_begin() else {
            debug!("Training already in progress, skipping this attempt");
            return None;
        };
        // Checked while holding the slot: a concurrent close either sees
        // this session as running or this launch sees the pipeline closed.
        if self.closed.load(Ordering::SeqCst) {
            debug!("Training pipeline closed, skipping this attempt");
            return None;
        }

        let session_id = Uuid::new_v4();
        let source = Arc::clone(&self.source);
        let trainer = Arc::clone(&self.trainer);
        let registry = Arc::clone(&self.registry);
        let outcomes = self.outcomes.clone();
        let latest = self.latest.clone();

        debug!(session = %session_id, "Training session started");

        Some(self.runtime.spawn(async move {
            let started = Instant::now();

            let result = tokio::task::spawn_blocking(move || {
                run_session(source.as_ref(), trainer.as_ref(), &registry)
            })
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))
            .and_then(|r| r);

            let elapsed_ms = started.elapsed().as_millis() as u64;
            let completed_at = Utc::now();
            let outcome = match result {
                Ok(SessionResult::Published { version, ratings }) => {
                    info!(session = %session_id, version, ratings, elapsed_ms, "Training session published model");
                    TrainingOutcome::Published {
                        session_id,
                        version,
                        ratings,
                        elapsed_ms,
                        completed_at,
                    }
                }
                Ok(SessionResult::Empty) => {
                    info!(session = %session_id, "No ratings available, keeping current model");
                    TrainingOutcome::SkippedEmpty {
                        session_id,
                        elapsed_ms,
                        completed_at,
                    }
                }
                Err(e) => {
                    match &e {
                        Error::DataSource(_) => {
                            warn!(session = %session_id, "Training session aborted: {}", e)
                        }
                        _ => error!(session = %session_id, "Training session failed: {}", e),
                    }
                    TrainingOutcome::Failed {
                        session_id,
                        error: e.to_string(),
                        elapsed_ms,
                        completed_at,
                    }
                }
            };

            // Recorded while the slot is held, so an idle pipeline always
            // has its last session's outcome in place
            latest.send_replace(Some(outcome.clone()));
            // Free the slot before subscribers hear about the outcome
            permit.release();
            let _ = outcomes.send(outcome.clone());
            outcome
        }))
    }

    /// Subscribe to outcomes of sessions completing after this call
    pub fn subscribe(&self) -> broadcast::Receiver<TrainingOutcome> {
        self.outcomes.subscribe()
    }

    /// Outcome of the most recently finished session, if any
    pub fn last_outcome(&self) -> Option<TrainingOutcome> {
        self.latest.borrow().clone()
    }

    /// Receiver that always holds the latest outcome, including one that
    /// finished before this call
    pub fn watch_outcome(&self) -> watch::Receiver<Option<TrainingOutcome>> {
        self.latest.subscribe()
    }

    pub fn is_training(&self) -> bool {
        self.guard.is_training()
    }

    /// Refuse all further launches; sessions already running finish normally
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }
}

fn run_session(
    source: &dyn RatingSource,
    trainer: &dyn Trainer,
    registry: &ModelRegistry,
) -> Result<SessionResult> {
    let ratings = fetch_ratings(source)?;
    if ratings.is_empty() {
        return Ok(SessionResult::Empty);
    }

    let model = trainer
        .train(&ratings)
        .map_err(|e| Error::Training(e.to_string()))?;
    let version = registry.publish(model);

    Ok(SessionResult::Published {
        version,
        ratings: ratings.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::model::{Model, UnknownEntity};
    use crate::source::StaticRatings;
    use recrank_common::Rating;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Constant(f64);

    impl Model for Constant {
        fn predict(&self, _user_id: i32, _item_id: i32) -> std::result::Result<f64, UnknownEntity> {
            Ok(self.0)
        }
    }

    /// Trains a constant model equal to the mean rating
    #[derive(Default)]
    struct MeanTrainer {
        calls: AtomicUsize,
    }

    impl Trainer for MeanTrainer {
        fn train(&self, ratings: &[Rating]) -> std::result::Result<Arc<dyn Model>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mean = ratings.iter().map(|r| r.value).sum::<f64>() / ratings.len() as f64;
            Ok(Arc::new(Constant(mean)))
        }
    }

    struct PanickingTrainer;

    impl Trainer for PanickingTrainer {
        fn train(&self, _ratings: &[Rating]) -> std::result::Result<Arc<dyn Model>, BoxError> {
            panic!("numerical library crashed");
        }
    }

    struct FailingTrainer;

    impl Trainer for FailingTrainer {
        fn train(&self, _ratings: &[Rating]) -> std::result::Result<Arc<dyn Model>, BoxError> {
            Err("did not converge".into())
        }
    }

    fn pipeline_with(source: impl RatingSource + 'static, trainer: Arc<dyn Trainer>) -> TrainingPipeline {
        TrainingPipeline::new(
            Arc::new(source),
            trainer,
            Arc::new(ModelRegistry::new()),
            Handle::current(),
        )
    }

    fn ratings() -> StaticRatings {
        StaticRatings::new(vec![Rating::new(1, 10, 4.0), Rating::new(2, 10, 2.0)])
    }

    #[tokio::test]
    async fn test_launch_publishes_model() {
        let pipeline = pipeline_with(ratings(), Arc::new(MeanTrainer::default()));

        let outcome = pipeline.launch().unwrap().await.unwrap();

        assert_eq!(outcome.version(), Some(1));
        assert!(!pipeline.is_training());
        let snapshot = pipeline.registry().read_snapshot().unwrap();
        assert_eq!(snapshot.model.predict(1, 10).unwrap(), 3.0);
    }

    #[tokio::test]
    async fn test_empty_ratings_leave_registry_untouched() {
        let trainer = Arc::new(MeanTrainer::default());
        let pipeline = pipeline_with(StaticRatings::default(), trainer.clone());

        let outcome = pipeline.launch().unwrap().await.unwrap();

        assert!(matches!(outcome, TrainingOutcome::SkippedEmpty { .. }));
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.registry().current_version(), 0);
        assert!(!pipeline.registry().is_ready());
    }

    #[tokio::test]
    async fn test_empty_ratings_keep_previous_model() {
        let calls = AtomicUsize::new(0);
        let source = move || -> std::result::Result<Vec<Rating>, BoxError> {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(vec![Rating::new(1, 10, 5.0)]),
                _ => Ok(Vec::new()),
            }
        };
        let pipeline = pipeline_with(source, Arc::new(MeanTrainer::default()));

        pipeline.launch().unwrap().await.unwrap();
        let before = pipeline.registry().read_snapshot().unwrap();
        pipeline.launch().unwrap().await.unwrap();
        let after = pipeline.registry().read_snapshot().unwrap();

        assert_eq!(after.version, 1);
        assert!(Arc::ptr_eq(&before.model, &after.model));
    }

    #[tokio::test]
    async fn test_trainer_error_releases_guard() {
        let pipeline = pipeline_with(ratings(), Arc::new(FailingTrainer));

        let outcome = pipeline.launch().unwrap().await.unwrap();

        match outcome {
            TrainingOutcome::Failed { error, .. } => assert!(error.contains("did not converge")),
            other => panic!("Expected failure, got {:?}", other),
        }
        assert!(!pipeline.is_training());
        assert!(pipeline.launch().is_some());
    }

    #[tokio::test]
    async fn test_trainer_panic_is_contained() {
        let pipeline = pipeline_with(ratings(), Arc::new(PanickingTrainer));

        let outcome = pipeline.launch().unwrap().await.unwrap();

        assert!(outcome.is_failure());
        assert!(!pipeline.is_training());
        assert!(!pipeline.registry().is_ready());
    }

    #[tokio::test]
    async fn test_outcomes_are_broadcast() {
        let pipeline = pipeline_with(ratings(), Arc::new(MeanTrainer::default()));
        let mut rx = pipeline.subscribe();

        let handle = pipeline.launch().unwrap();
        let joined = handle.await.unwrap();
        let received = rx.recv().await.unwrap();

        assert_eq!(received.session_id(), joined.session_id());
        assert_eq!(received.version(), Some(1));
    }

    #[tokio::test]
    async fn test_last_outcome_available_after_the_fact() {
        let pipeline = pipeline_with(ratings(), Arc::new(FailingTrainer));
        assert!(pipeline.last_outcome().is_none());

        let joined = pipeline.launch().unwrap().await.unwrap();
        // Subscribed only after the session finished
        let watcher = pipeline.watch_outcome();

        let latest = pipeline.last_outcome().unwrap();
        assert!(latest.is_failure());
        assert_eq!(latest.session_id(), joined.session_id());
        let watched = watcher.borrow().clone().unwrap();
        assert_eq!(watched.session_id(), joined.session_id());
    }

    #[tokio::test]
    async fn test_closed_pipeline_refuses_launch() {
        let trainer = Arc::new(MeanTrainer::default());
        let pipeline = pipeline_with(ratings(), trainer.clone());

        pipeline.close();

        assert!(pipeline.is_closed());
        assert!(pipeline.launch().is_none());
        assert!(!pipeline.is_training());
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_outcome_serializes_with_type_tag() {
        let pipeline = pipeline_with(ratings(), Arc::new(FailingTrainer));

        let outcome = pipeline.launch().unwrap().await.unwrap();
        let json: serde_json::Value = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["type"], "Failed");
        assert_eq!(json["session_id"], outcome.session_id().to_string());
        assert!(json["error"].as_str().unwrap().contains("did not converge"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_launch_while_busy_is_skipped() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let source = move || -> std::result::Result<Vec<Rating>, BoxError> {
            release_rx.lock().unwrap().recv().ok();
            Ok(vec![Rating::new(1, 10, 4.0)])
        };
        let pipeline = pipeline_with(source, Arc::new(MeanTrainer::default()));

        let first = pipeline.launch().expect("first launch should start");
        assert!(pipeline.launch().is_none());
        assert_eq!(pipeline.registry().current_version(), 0);

        release_tx.send(()).unwrap();
        let outcome = first.await.unwrap();

        assert_eq!(outcome.version(), Some(1));
        assert_eq!(pipeline.registry().current_version(), 1);
    }
}
