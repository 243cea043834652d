//! Custom error types for the application.
//!
//! This module defines the primary error type, `QueueError`, for the scan queue
//! engine. Using the `thiserror` crate, it provides a centralized and consistent
//! way to handle the failures that can stop a run, from configuration issues to a
//! worker that has gone away.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps [`ConfigError`], covering both file/env parsing and
//!   semantic validation of the loaded settings.
//! - **`Io`**: Wraps standard `std::io::Error` (process pipes, run-state file).
//! - **`ChannelClosed`**: The command or status side of the worker channel is gone.
//!   This is always fatal to the current run; there is no automatic restart.
//! - **`WorkerSpawn`** / **`WorkerInit`**: The isolated worker could not be started,
//!   or could not build its device and plan-executor context.
//! - **`WorkerExited`**: The worker thread panicked outside a scan, or the worker
//!   process exited with a failure status.
//! - **`Wire`**: A line on the process channel could not be encoded or decoded.
//! - **`Import`**: Wraps [`ImportError`] from bulk plan import.
//!
//! Per-scan failures are *not* represented here. They are reported on the status
//! channel as `StatusEvent::Failed` and never abort a run.

use crate::config::ConfigError;
use crate::scan::import::ImportError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, QueueError>;

/// Errors that stop a run or keep one from starting.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Settings failed to load or validate.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipe or run-state file I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker can no longer be reached.
    #[error("Worker channel closed: {0}")]
    ChannelClosed(String),

    /// The worker thread or process could not be launched.
    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),

    /// The worker could not build its executor.
    #[error("Worker initialization failed: {0}")]
    WorkerInit(String),

    /// The worker panicked outside a scan or exited with a failure status.
    #[error("Worker exited abnormally: {0}")]
    WorkerExited(String),

    /// A wire line could not be encoded or decoded.
    #[error("Wire format error: {0}")]
    Wire(#[from] serde_json::Error),

    /// Bulk plan import failed.
    #[error("Plan import error: {0}")]
    Import(#[from] ImportError),

    /// The shared run-state byte could not be created or opened.
    #[error("Run state error: {0}")]
    RunState(String),
}

impl QueueError {
    /// Whether this error means the worker can no longer be reached.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, QueueError::ChannelClosed(_))
    }
}
