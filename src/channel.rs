//! The command/status conduit between controller and worker.
//!
//! The controller always sees the same two endpoints: an async `mpsc::Sender` of
//! [`Command`]s and an async `mpsc::Receiver` of [`StatusEvent`]s. The worker sees
//! a blocking [`CommandSource`] and [`StatusSink`], implemented either over the
//! same in-process channels or over line-delimited JSON on a pair of byte
//! streams.

use std::io::{BufRead, Write};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{AppResult, QueueError};
use crate::messages::{decode_command, encode_line, Command, StatusEvent};

/// Controller-side endpoints.
#[derive(Debug)]
pub struct ControllerEnd {
    /// Commands to the worker.
    pub commands: mpsc::Sender<Command>,
    /// Status events from the worker.
    pub status: mpsc::Receiver<StatusEvent>,
}

/// Worker-side endpoints for a thread-hosted worker.
#[derive(Debug)]
pub struct WorkerEnd {
    /// Commands from the controller.
    pub commands: mpsc::Receiver<Command>,
    /// Status events to the controller.
    pub status: mpsc::Sender<StatusEvent>,
}

/// Create a connected pair of endpoints.
pub fn pair(command_capacity: usize, status_capacity: usize) -> (ControllerEnd, WorkerEnd) {
    let (command_tx, command_rx) = mpsc::channel(command_capacity);
    let (status_tx, status_rx) = mpsc::channel(status_capacity);
    (
        ControllerEnd {
            commands: command_tx,
            status: status_rx,
        },
        WorkerEnd {
            commands: command_rx,
            status: status_tx,
        },
    )
}

/// A payload the worker could not make sense of.
#[derive(Debug, Clone, PartialEq)]
pub struct Unrecognized {
    /// Why decoding failed.
    pub reason: String,
    /// The raw payload.
    pub payload: String,
}

/// Blocking source of commands for the worker loop.
///
/// `None` means the controller side is gone.
pub trait CommandSource {
    /// Block until the next command arrives.
    fn next_command(&mut self) -> Option<Result<Command, Unrecognized>>;
}

/// Blocking sink for status events.
pub trait StatusSink {
    /// Send one event, failing if the controller side is gone.
    fn emit(&mut self, event: StatusEvent) -> AppResult<()>;
}

impl CommandSource for mpsc::Receiver<Command> {
    fn next_command(&mut self) -> Option<Result<Command, Unrecognized>> {
        self.blocking_recv().map(Ok)
    }
}

impl StatusSink for mpsc::Sender<StatusEvent> {
    fn emit(&mut self, event: StatusEvent) -> AppResult<()> {
        self.blocking_send(event)
            .map_err(|_| QueueError::ChannelClosed("status receiver dropped".to_string()))
    }
}

/// Commands decoded from JSON lines (the worker process's stdin).
pub struct LineSource<R> {
    reader: R,
    buf: String,
}

impl<R: BufRead> LineSource<R> {
    /// Read commands from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> CommandSource for LineSource<R> {
    fn next_command(&mut self) -> Option<Result<Command, Unrecognized>> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let line = self.buf.trim();
                    if line.is_empty() {
                        continue;
                    }
                    trace!(line, "command line received");
                    return Some(decode_command(line).map_err(|e| Unrecognized {
                        reason: e.to_string(),
                        payload: line.to_string(),
                    }));
                }
                Err(e) => {
                    // Invalid UTF-8 and friends are reported, not fatal.
                    return Some(Err(Unrecognized {
                        reason: e.to_string(),
                        payload: String::new(),
                    }));
                }
            }
        }
    }
}

/// Status events encoded as JSON lines (the worker process's stdout).
pub struct LineSink<W> {
    writer: W,
}

impl<W: Write> LineSink<W> {
    /// Write events to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> StatusSink for LineSink<W> {
    fn emit(&mut self, event: StatusEvent) -> AppResult<()> {
        let line = encode_line(&event)?;
        let write = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush());
        write.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => {
                QueueError::ChannelClosed("status pipe closed".to_string())
            }
            _ => QueueError::Io(e),
        })
    }
}
