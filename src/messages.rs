//! Message types for controller <-> worker communication
//!
//! Commands flow from the controller to the worker, status events flow back. Both
//! directions use the same types whether the worker is a thread (values move
//! through `tokio::sync::mpsc`) or a child process (values are encoded as one JSON
//! object per line on stdin/stdout).
//!
//! # Wire shape
//!
//! ```text
//! -> {"command":"scan","id":"…","name":"s1","xstart":0.0,…}
//! -> {"command":"terminate"}
//! <- {"status":"running","request_id":"…","name":"s1"}
//! <- {"status":"completed"}
//! <- {"status":"failed","error":"…","trace":"…"}
//! ```

use serde::{Deserialize, Serialize};

use crate::scan::{RequestId, ScanRequest};

/// Controller -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Execute one scan request
    Scan(ScanRequest),
    /// Leave the receive loop and shut the worker down
    Terminate,
}

/// Worker -> controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusEvent {
    /// The worker has started executing a request
    Running {
        /// Id of the request now executing.
        request_id: RequestId,
        /// Its name.
        name: String,
    },
    /// The current request finished successfully
    Completed,
    /// The current request (or an unrecognized command) failed
    Failed {
        /// What went wrong.
        error: String,
        /// Error chain, panic payload or undecodable line.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace: Option<String>,
    },
}

impl StatusEvent {
    /// Completed or Failed: the worker is done with its current item.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusEvent::Running { .. })
    }

    /// Short label matching the wire `status` field.
    pub fn label(&self) -> &'static str {
        match self {
            StatusEvent::Running { .. } => "running",
            StatusEvent::Completed => "completed",
            StatusEvent::Failed { .. } => "failed",
        }
    }
}

/// Encode a message as a single line (no trailing newline).
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

/// Decode one line received from the other side of a process channel.
pub fn decode_command(line: &str) -> serde_json::Result<Command> {
    serde_json::from_str(line.trim())
}

/// Decode one status line.
pub fn decode_status(line: &str) -> serde_json::Result<StatusEvent> {
    serde_json::from_str(line.trim())
}
