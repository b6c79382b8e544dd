//! Retraining scheduler
//!
//! One timer task per engine. Each tick launches the training pipeline and
//! moves on without waiting; a tick that lands while a session is still
//! running is a no-op via the training guard. Missed ticks are skipped, not
//! replayed, so a slow session never causes a burst of catch-up attempts.

use crate::error::{Error, Result};
use crate::pipeline::TrainingPipeline;
use recrank_common::config::ScheduleSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Timing of the recurring training cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Time before the first scheduled attempt
    pub initial_delay: Duration,

    /// Time between attempts (must be non-zero)
    pub interval: Duration,

    /// Launch one extra attempt immediately at startup
    pub train_on_start: bool,
}

impl ScheduleConfig {
    pub fn new(initial_delay: Duration, interval: Duration) -> Result<Self> {
        let config = Self {
            initial_delay,
            interval,
            train_on_start: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_train_on_start(mut self, train_on_start: bool) -> Self {
        self.train_on_start = train_on_start;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig(
                "training interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<&ScheduleSettings> for ScheduleConfig {
    type Error = Error;

    fn try_from(settings: &ScheduleSettings) -> Result<Self> {
        Ok(Self::new(settings.initial_delay(), settings.interval())?
            .with_train_on_start(settings.train_on_start))
    }
}

/// Handle to a running timer task; stopping it (or dropping the handle)
/// ends the schedule without touching sessions already in flight.
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the timer and wait for its task to exit
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start the recurring training cycle
///
/// Fails fast on an invalid configuration, before any task is spawned.
pub fn start(
    config: ScheduleConfig,
    pipeline: Arc<TrainingPipeline>,
    runtime: &Handle,
) -> Result<SchedulerHandle> {
    config.validate()?;

    info!(
        "Starting training schedule (initial delay: {:?}, interval: {:?}, train on start: {})",
        config.initial_delay, config.interval, config.train_on_start
    );

    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = runtime.spawn(async move {
        if config.train_on_start {
            let _ = pipeline.launch();
        }

        let mut timer = interval_at(Instant::now() + config.initial_delay, config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Training schedule stopped");
                    break;
                }
                _ = timer.tick() => {
                    if pipeline.is_closed() {
                        debug!("Training pipeline closed, ending schedule");
                        break;
                    }
                    if pipeline.launch().is_none() {
                        debug!("Scheduled training skipped: previous session still running");
                    }
                }
            }
        }
    });

    Ok(SchedulerHandle {
        cancel,
        task: Some(task),
    })
}
