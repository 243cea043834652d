//! Process-hosted worker.
//!
//! The controller launches `<program> worker --run-state <file> --settings <json>`
//! with piped stdin/stdout. Two relay tasks adapt the pipes to the same
//! `mpsc` endpoints a thread-hosted worker uses:
//!
//! - commands: `mpsc` -> JSON line -> child stdin
//! - status: child stdout -> JSON line -> `mpsc`
//!
//! When the child exits (cleanly or not) its stdout reaches EOF, the status relay
//! drops its sender, and the controller observes a closed channel.

use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::Worker;
use crate::channel::{ControllerEnd, LineSink, LineSource};
use crate::config::Settings;
use crate::error::{AppResult, QueueError};
use crate::executor::SimulatedExecutor;
use crate::messages::{decode_status, encode_line, Command, StatusEvent};
use crate::run_state::{RunStateReader, RunStateWriter};

pub(crate) struct ProcessWorker {
    child: Child,
    pid: Option<u32>,
    command_relay: JoinHandle<AppResult<()>>,
    status_relay: JoinHandle<()>,
}

pub(crate) fn spawn(
    program: &Path,
    settings: &Settings,
) -> AppResult<(ProcessWorker, ControllerEnd, RunStateReader)> {
    let (run_state, state_path) = RunStateReader::create_shared(&std::env::temp_dir())?;
    let settings_json = serde_json::to_string(settings)?;

    let mut child = tokio::process::Command::new(program)
        .arg("worker")
        .arg("--run-state")
        .arg(&state_path)
        .arg("--settings")
        .arg(&settings_json)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| QueueError::WorkerSpawn(format!("{}: {}", program.display(), e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| QueueError::WorkerSpawn("worker stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| QueueError::WorkerSpawn("worker stdout not captured".to_string()))?;

    let config = &settings.worker;
    let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
    let (status_tx, status_rx) = mpsc::channel(config.status_capacity);

    let command_relay = tokio::spawn(relay_commands(command_rx, stdin));
    let status_relay = tokio::spawn(relay_status(stdout, status_tx));

    let pid = child.id();
    info!(?pid, program = %program.display(), "Scan worker process spawned");

    Ok((
        ProcessWorker {
            child,
            pid,
            command_relay,
            status_relay,
        },
        ControllerEnd {
            commands: command_tx,
            status: status_rx,
        },
        run_state,
    ))
}

async fn relay_commands(mut rx: mpsc::Receiver<Command>, mut stdin: ChildStdin) -> AppResult<()> {
    while let Some(command) = rx.recv().await {
        let terminate = matches!(command, Command::Terminate);
        let mut line = encode_line(&command)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        if terminate {
            break;
        }
    }
    // Dropping stdin closes the worker's command stream.
    debug!("Command relay finished");
    Ok(())
}

async fn relay_status(stdout: ChildStdout, tx: mpsc::Sender<StatusEvent>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                trace!(%line, "status line received");
                match decode_status(&line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%line, "Discarding undecodable status line: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Worker status pipe failed: {}", e);
                break;
            }
        }
    }
    debug!("Worker status stream ended");
}

impl ProcessWorker {
    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) async fn join(mut self) -> AppResult<()> {
        let status = self.child.wait().await?;
        match self.command_relay.await {
            Ok(Err(e)) => debug!("Command relay ended with error: {}", e),
            Err(e) => warn!("Command relay task failed: {}", e),
            Ok(Ok(())) => {}
        }
        if let Err(e) = self.status_relay.await {
            warn!("Status relay task failed: {}", e);
        }

        if status.success() {
            info!("Scan worker process exited");
            Ok(())
        } else {
            Err(QueueError::WorkerExited(format!("worker process {}", status)))
        }
    }
}

/// Entry point for the `worker` subcommand: serve commands from stdin, write
/// status to stdout.
///
/// Builds its own simulated stage and executor; nothing is shared with the
/// controller except the run state file.
pub fn serve_stdio(run_state_path: &Path, settings: &Settings) -> AppResult<()> {
    let writer = RunStateWriter::open(run_state_path)?;
    let factory = SimulatedExecutor::factory(settings.executor.clone());
    let mut worker = Worker::initialize(Box::new(factory), writer)?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut source = LineSource::new(stdin.lock());
    let mut sink = LineSink::new(stdout.lock());
    worker.main_loop(&mut source, &mut sink)
}
