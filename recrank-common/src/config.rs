//! Configuration loading and config file resolution
//!
//! Bootstrap configuration for the recrank host process, loaded from TOML.
//! Every field has a built-in default so a missing file or a partial file is
//! never fatal.
//!
//! # Config File Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`RECRANK_CONFIG`)
//! 3. Platform config directory (`<config_dir>/recrank/config.toml`)
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RECRANK_CONFIG";

/// Top-level TOML configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct RecrankConfig {
    pub schedule: ScheduleSettings,
    pub trainer: TrainerSettings,
    pub source: SourceSettings,
    pub logging: LoggingConfig,
}

/// Retraining schedule
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Seconds before the first training attempt
    pub initial_delay_secs: u64,

    /// Seconds between training attempts (must be > 0)
    pub interval_secs: u64,

    /// Fire one attempt immediately at startup, ignoring `initial_delay_secs`
    pub train_on_start: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 0,
            interval_secs: 3600,
            train_on_start: false,
        }
    }
}

impl ScheduleSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Alternating least squares hyperparameters
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainerSettings {
    pub rank: usize,
    pub iterations: usize,
    pub lambda: f64,
    pub seed: u64,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            rank: 10,
            iterations: 10,
            lambda: 0.01,
            seed: 42,
        }
    }
}

/// Where ratings come from
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SourceSettings {
    /// JSON array or JSON-lines file of ratings
    pub ratings_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RecrankConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RecrankConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    ///
    /// A missing file is not an error: defaults are returned and a warning
    /// is logged. An unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using built-in defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Resolve the config file location and load it
    pub fn resolve_and_load(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) => Self::load(&path),
            None => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values that would only fail later at runtime
    pub fn validate(&self) -> Result<()> {
        if self.schedule.interval_secs == 0 {
            return Err(Error::Config(
                "schedule.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.trainer.rank == 0 {
            return Err(Error::Config("trainer.rank must be greater than zero".to_string()));
        }
        if !(self.trainer.lambda >= 0.0) {
            return Err(Error::Config("trainer.lambda must be non-negative".to_string()));
        }
        Ok(())
    }
}

/// Config file resolution following the priority order in the module docs
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory, only if the file exists
    default_config_path().filter(|p| p.exists())
}

/// `<config_dir>/recrank/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("recrank").join("config.toml"))
}
