//! Recommendation engine
//!
//! Owns one registry, one training pipeline and (in recurring mode) one
//! schedule. Two construction modes:
//!
//! - **Recurring**: ratings pulled from a [`RatingSource`] on a fixed schedule
//! - **One-shot**: a fixed rating collection trained once, immediately
//!
//! Both start training in the background and return at once; predictions
//! fail with [`Error::ModelNotReady`] until the first session publishes.

use crate::error::{Error, Result};
use crate::pipeline::{TrainingOutcome, TrainingPipeline};
use crate::registry::ModelRegistry;
use crate::scheduler::{self, ScheduleConfig, SchedulerHandle};
use crate::service::{Prediction, PredictionService};
use crate::source::{RatingSource, StaticRatings};
use crate::trainer::Trainer;
use recrank_common::Rating;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Poll period of [`RecommendationEngine::wait_idle`]
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct RecommendationEngine {
    service: PredictionService,
    pipeline: Arc<TrainingPipeline>,
    trainer: Arc<dyn Trainer>,
    schedule: Mutex<Option<SchedulerHandle>>,
    shut_down: AtomicBool,
}

impl RecommendationEngine {
    /// Recurring mode: start the background training cycle immediately
    ///
    /// Must be called from within a Tokio runtime. An invalid schedule is
    /// rejected here, before anything is spawned.
    pub fn recurring(
        source: Arc<dyn RatingSource>,
        trainer: Arc<dyn Trainer>,
        config: ScheduleConfig,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let engine = Self::build(source, trainer, runtime.clone());
        let handle = scheduler::start(config, Arc::clone(&engine.pipeline), &runtime)?;
        *engine.schedule_slot() = Some(handle);

        info!("Recommendation engine started in recurring mode");
        Ok(engine)
    }

    /// One-shot mode: train once on `ratings`, asynchronously, with no timer
    ///
    /// Must be called from within a Tokio runtime.
    pub fn one_shot(ratings: Vec<Rating>, trainer: Arc<dyn Trainer>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let count = ratings.len();

        let engine = Self::build(Arc::new(StaticRatings::new(ratings)), trainer, runtime);
        // A fresh guard is always free
        let _ = engine.pipeline.launch();

        info!(ratings = count, "Recommendation engine started in one-shot mode");
        Ok(engine)
    }

    fn build(source: Arc<dyn RatingSource>, trainer: Arc<dyn Trainer>, runtime: Handle) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let pipeline = Arc::new(TrainingPipeline::new(
            source,
            Arc::clone(&trainer),
            Arc::clone(&registry),
            runtime,
        ));

        Self {
            service: PredictionService::new(registry),
            pipeline,
            trainer,
            schedule: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.service.is_ready()
    }

    /// See [`PredictionService::predict`]
    pub fn predict(&self, user_id: i32, item_id: i32) -> Result<Option<f64>> {
        self.service.predict(user_id, item_id)
    }

    pub fn predict_with_version(&self, user_id: i32, item_id: i32) -> Result<Prediction> {
        self.service.predict_with_version(user_id, item_id)
    }

    pub fn current_version(&self) -> u64 {
        self.service.current_version()
    }

    /// Handle for callers that only need to read predictions
    pub fn predictor(&self) -> PredictionService {
        self.service.clone()
    }

    /// Launch a training session outside the schedule
    ///
    /// `None` if a session is already running or the engine is shut down.
    pub fn trigger_training(&self) -> Option<JoinHandle<TrainingOutcome>> {
        if self.shut_down.load(Ordering::Acquire) {
            warn!("Training trigger ignored: engine is shut down");
            return None;
        }
        self.pipeline.launch()
    }

    /// Outcomes of training sessions completing after this call
    pub fn subscribe(&self) -> broadcast::Receiver<TrainingOutcome> {
        self.pipeline.subscribe()
    }

    /// Outcome of the most recent training session
    ///
    /// Unlike [`subscribe`](Self::subscribe) this also reports sessions that
    /// finished before the caller asked, e.g. the only session of a one-shot
    /// engine.
    pub fn last_outcome(&self) -> Option<TrainingOutcome> {
        self.pipeline.last_outcome()
    }

    pub fn watch_outcome(&self) -> watch::Receiver<Option<TrainingOutcome>> {
        self.pipeline.watch_outcome()
    }

    pub fn is_training(&self) -> bool {
        self.pipeline.is_training()
    }

    /// Wait until no training session is running
    pub async fn wait_idle(&self) {
        while self.pipeline.is_training() {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Stop the schedule and release trainer resources
    ///
    /// Idempotent; resources are released on the first call only. No session
    /// starts after this returns, whatever its trigger. Callers
    /// must let any running session finish first (see
    /// [`wait_idle`](Self::wait_idle)); the served model stays readable.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Recommendation engine already shut down");
            return;
        }

        self.pipeline.close();
        if let Some(handle) = self.schedule_slot().take() {
            handle.stop();
        }
        if self.pipeline.is_training() {
            warn!("Shutting down while a training session is still running");
        }
        self.trainer.release();

        info!("Recommendation engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn schedule_slot(&self) -> std::sync::MutexGuard<'_, Option<SchedulerHandle>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RecommendationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::model::{Model, UnknownEntity};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Zero;

    impl Model for Zero {
        fn predict(&self, _user_id: i32, _item_id: i32) -> std::result::Result<f64, UnknownEntity> {
            Ok(0.0)
        }
    }

    #[derive(Default)]
    struct CountingTrainer {
        releases: AtomicUsize,
    }

    impl Trainer for CountingTrainer {
        fn train(&self, _ratings: &[Rating]) -> std::result::Result<Arc<dyn Model>, BoxError> {
            Ok(Arc::new(Zero))
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_requires_runtime() {
        let result = RecommendationEngine::one_shot(vec![], Arc::new(CountingTrainer::default()));
        assert!(matches!(result, Err(Error::NoRuntime)));
    }

    #[tokio::test]
    async fn test_recurring_rejects_zero_interval() {
        let config = ScheduleConfig {
            initial_delay: Duration::ZERO,
            interval: Duration::ZERO,
            train_on_start: false,
        };
        let source = Arc::new(StaticRatings::default());

        let result =
            RecommendationEngine::recurring(source, Arc::new(CountingTrainer::default()), config);

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_shutdown_releases_trainer_once() {
        let trainer = Arc::new(CountingTrainer::default());
        let engine =
            RecommendationEngine::one_shot(vec![Rating::new(1, 1, 1.0)], trainer.clone()).unwrap();
        engine.wait_idle().await;

        engine.shutdown();
        engine.shutdown();
        drop(engine);

        assert_eq!(trainer.releases.load(Ordering::SeqCst), 1);
    }

    struct FailingTrainer;

    impl Trainer for FailingTrainer {
        fn train(&self, _ratings: &[Rating]) -> std::result::Result<Arc<dyn Model>, BoxError> {
            Err("matrix is singular".into())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_shot_failure_is_observable_afterwards() {
        let engine =
            RecommendationEngine::one_shot(vec![Rating::new(1, 1, 1.0)], Arc::new(FailingTrainer))
                .unwrap();
        engine.wait_idle().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!engine.is_ready());
        assert!(!engine.is_training());
        match engine.last_outcome() {
            Some(TrainingOutcome::Failed { error, .. }) => {
                assert!(error.contains("matrix is singular"))
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert!(engine.watch_outcome().borrow().as_ref().is_some_and(|o| o.is_failure()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_schedule_launches_nothing_after_shutdown() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = {
            let fetches = fetches.clone();
            move || -> std::result::Result<Vec<Rating>, BoxError> {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(vec![Rating::new(1, 1, 1.0)])
            }
        };
        let trainer = Arc::new(CountingTrainer::default());
        let config = ScheduleConfig::new(Duration::ZERO, Duration::from_millis(1)).unwrap();
        let engine = RecommendationEngine::recurring(Arc::new(source), trainer.clone(), config)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        engine.shutdown();
        engine.wait_idle().await;
        let at_shutdown = fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fetches.load(Ordering::SeqCst), at_shutdown);
        assert_eq!(trainer.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trigger_after_shutdown_is_ignored() {
        let engine = RecommendationEngine::one_shot(
            vec![Rating::new(1, 1, 1.0)],
            Arc::new(CountingTrainer::default()),
        )
        .unwrap();
        engine.wait_idle().await;

        engine.shutdown();

        assert!(engine.is_shut_down());
        assert!(engine.trigger_training().is_none());
        // The last model keeps serving
        assert_eq!(engine.predict(1, 1).unwrap(), Some(0.0));
    }
}
