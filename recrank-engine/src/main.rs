//! recrank - Main entry point
//!
//! Host process for the recommendation engine: loads configuration, reads
//! ratings from a JSON file, retrains on a schedule and logs every training
//! outcome until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use recrank_common::config::RecrankConfig;
use recrank_engine::als::AlsTrainer;
use recrank_engine::source::{JsonFileSource, RatingSource};
use recrank_engine::{RecommendationEngine, ScheduleConfig, TrainingOutcome};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for recrank
#[derive(Parser, Debug)]
#[command(name = "recrank")]
#[command(about = "Background-retrained rating prediction engine")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ratings file (JSON array or JSON lines); overrides source.ratings_path
    #[arg(short, long, env = "RECRANK_RATINGS")]
    ratings: Option<PathBuf>,

    /// Train once on the current ratings, answer --predict queries and exit
    #[arg(long)]
    once: bool,

    /// USER:ITEM pair to predict once a model is ready (repeatable)
    #[arg(short, long = "predict", value_parser = parse_pair)]
    predictions: Vec<(i32, i32)>,
}

fn parse_pair(s: &str) -> std::result::Result<(i32, i32), String> {
    let (user, item) = s
        .split_once(':')
        .ok_or_else(|| format!("expected USER:ITEM, got '{}'", s))?;
    let user = user.trim().parse::<i32>().map_err(|e| format!("invalid user id '{}': {}", user, e))?;
    let item = item.trim().parse::<i32>().map_err(|e| format!("invalid item id '{}': {}", item, e))?;
    Ok((user, item))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = RecrankConfig::resolve_and_load(args.config.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing
    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("recrank={level},recrank_engine={level},recrank_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(ratings_path) = args.ratings.or(config.source.ratings_path.clone()) else {
        bail!("No ratings file given (use --ratings or source.ratings_path)");
    };
    info!("Ratings file: {}", ratings_path.display());

    let source = JsonFileSource::new(ratings_path);
    let trainer = Arc::new(
        AlsTrainer::from_settings(&config.trainer).context("Invalid trainer configuration")?,
    );

    let engine = if args.once {
        let ratings = source
            .fetch()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to read ratings")?;
        RecommendationEngine::one_shot(ratings, trainer)?
    } else {
        let schedule = ScheduleConfig::try_from(&config.schedule)
            .context("Invalid schedule configuration")?;
        RecommendationEngine::recurring(Arc::new(source), trainer, schedule)?
    };

    if args.once {
        engine.wait_idle().await;
        if let Some(outcome) = engine.last_outcome() {
            log_outcome(&outcome);
        }
        answer_predictions(&engine, &args.predictions);
        engine.shutdown();
        return Ok(());
    }

    // Subscribe before the readiness check so a first model published in
    // between is seen by one or the other
    let mut outcomes = engine.subscribe();
    let mut answered = answer_if_ready(&engine, &args.predictions);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = outcomes.recv() => match received {
                Ok(outcome) => {
                    log_outcome(&outcome);
                    if let TrainingOutcome::Failed { error, .. } = &outcome {
                        warn!("Training attempt failed, still serving version {}: {}", engine.current_version(), error);
                    }
                    if !answered {
                        answered = answer_if_ready(&engine, &args.predictions);
                    }
                }
                Err(e) => warn!("Training outcome stream: {}", e),
            },
        }
    }

    engine.wait_idle().await;
    engine.shutdown();
    info!("Shutdown complete");
    Ok(())
}

/// Answer `pairs` once a model is being served; `true` when nothing is left
/// to answer
fn answer_if_ready(engine: &RecommendationEngine, pairs: &[(i32, i32)]) -> bool {
    if pairs.is_empty() {
        return true;
    }
    if !engine.is_ready() {
        return false;
    }
    answer_predictions(engine, pairs);
    true
}

fn log_outcome(outcome: &TrainingOutcome) {
    match serde_json::to_string(outcome) {
        Ok(json) => debug!("Training outcome: {}", json),
        Err(e) => warn!("Failed to serialize training outcome: {}", e),
    }
}

fn answer_predictions(engine: &RecommendationEngine, pairs: &[(i32, i32)]) {
    for &(user, item) in pairs {
        match engine.predict_with_version(user, item) {
            Ok(prediction) => match prediction.value {
                Some(value) => info!(
                    "predict({}, {}) = {:.3} (model version {})",
                    user, item, value, prediction.version
                ),
                None => info!("predict({}, {}): user or item unknown to model", user, item),
            },
            Err(e) => warn!("predict({}, {}) failed: {}", user, item, e),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
