//! Core library for the maia_daq scan queue.
//!
//! An operator queues raster scans and runs them unattended with
//! pause/resume/stop control. Scans execute in an isolated worker (a dedicated
//! thread or a child process), so a hung or failing scan never freezes the
//! controlling session.
//!
//! ```text
//! Controller ──snapshot──► QueueRunner ──Command──► Worker ──► PlanExecutor
//!     ▲                         ▲                     │
//!     │                      acks                  StatusEvent
//!     └──── broadcast ◄─── StatusMonitor ◄────────────┘
//! ```
//!
//! The worker is the only writer of [`run_state::RunState`]; everything else
//! reads it.

pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod hardware;
pub mod logging;
pub mod messages;
pub mod monitor;
pub mod run_state;
pub mod runner;
pub mod scan;
pub mod worker;

pub use config::{IsolationMode, Settings};
pub use controller::{ControlPanel, Controller};
pub use error::{AppResult, QueueError};
pub use messages::{Command, StatusEvent};
pub use monitor::MonitorEvent;
pub use run_state::RunState;
pub use runner::{ItemOutcome, ItemState, RunReport};
pub use scan::{ScanQueue, ScanRequest};
pub use worker::WorkerSpawn;
