//! Configuration System using Figment
//!
//! Settings are layered, lowest to highest precedence:
//! 1. Built-in defaults (an empty configuration is valid)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `MAIA_`, using `__` as the section separator
//!
//! ```text
//! MAIA_APPLICATION__LOG_LEVEL=debug
//! MAIA_WORKER__ISOLATION=process
//! MAIA_EXECUTOR__DWELL_SCALE=0.0
//! ```
//!
//! # Example
//!
//! ```no_run
//! use maia_daq::config::Settings;
//!
//! let settings = Settings::load(Some("config/maia.toml".as_ref()))?;
//! println!("Isolation: {:?}", settings.worker.isolation);
//! # Ok::<(), maia_daq::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer could not be read or extracted.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// A loaded value is out of range.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Scan worker isolation and channel sizing
    pub worker: WorkerConfig,
    /// Simulated plan executor tuning
    pub executor: ExecutorConfig,
    /// Sample stage jog defaults
    pub stage: StageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "MAIA data acquisition".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, ANSI colored when attached to a terminal
    Pretty,
    /// One JSON object per line
    Json,
}

/// How the scan worker is isolated from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Dedicated OS thread with per-scan panic containment
    Thread,
    /// Separate child process speaking JSON lines over stdio
    Process,
}

/// Scan worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Isolation mode for the worker
    pub isolation: IsolationMode,
    /// Worker executable for process isolation. Defaults to the running binary.
    pub program: Option<PathBuf>,
    /// Command channel capacity (controller -> worker)
    pub command_capacity: usize,
    /// Status channel capacity (worker -> controller)
    pub status_capacity: usize,
    /// Capacity of the broadcast relay feeding status listeners
    pub listener_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationMode::Thread,
            program: None,
            command_capacity: 16,
            status_capacity: 64,
            listener_capacity: 256,
        }
    }
}

/// Simulated executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Stage motion speed in mm/sec
    pub speed_mm_per_sec: f64,
    /// Settling time after each move in milliseconds
    pub settle_ms: u64,
    /// Multiplier applied to each request's dwell time (0 disables dwelling)
    pub dwell_scale: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            speed_mm_per_sec: 10.0,
            settle_ms: 50,
            dwell_scale: 1.0,
        }
    }
}

/// Stage jog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Lateral nudge step (x/y)
    pub nudge_step: f64,
    /// Focus step (z)
    pub focus_step: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            nudge_step: 10.0,
            focus_step: 10.0,
        }
    }
}

const MAX_NUDGE_STEP: f64 = 5000.0;
const MAX_FOCUS_STEP: f64 = 100.0;

impl Settings {
    /// Load settings from defaults, an optional TOML file and `MAIA_` environment variables.
    ///
    /// After loading, settings are validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Self = figment
            .merge(Env::prefixed("MAIA_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.worker.command_capacity == 0
            || self.worker.status_capacity == 0
            || self.worker.listener_capacity == 0
        {
            return Err(ConfigError::ValidationError(
                "Worker channel capacities must be greater than zero".to_string(),
            ));
        }

        if !(self.executor.speed_mm_per_sec > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid speed_mm_per_sec {}. Must be positive",
                self.executor.speed_mm_per_sec
            )));
        }

        if !(self.executor.dwell_scale >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid dwell_scale {}. Must be zero or positive",
                self.executor.dwell_scale
            )));
        }

        if !(0.0..=MAX_NUDGE_STEP).contains(&self.stage.nudge_step) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid nudge_step {}. Must be 0-{}",
                self.stage.nudge_step, MAX_NUDGE_STEP
            )));
        }

        if !(0.0..=MAX_FOCUS_STEP).contains(&self.stage.focus_step) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid focus_step {}. Must be 0-{}",
                self.stage.focus_step, MAX_FOCUS_STEP
            )));
        }

        Ok(())
    }
}
