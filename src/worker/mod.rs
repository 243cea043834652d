//! The isolated scan worker.
//!
//! A [`Worker`] owns the plan executor and the write side of the run state. It
//! builds both inside its own execution context, then sits in a blocking receive
//! loop: one command in, the scan executed to completion, status events out.
//!
//! ```text
//! Command::Scan  ──► RunState=Running ──► emit Running ──► execute (blocks)
//!                                                             │
//!                     emit Completed / Failed ◄── RunState=Idle
//! Command::Terminate ──► leave loop
//! ```
//!
//! A failed or panicking scan is reported and the loop continues; only a broken
//! status channel ends it early.
//!
//! Hosting:
//! - [`thread`]: dedicated OS thread sharing the process
//! - [`process`]: child process talking JSON lines over stdio

pub mod process;
pub mod thread;

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::channel::{CommandSource, ControllerEnd, StatusSink, Unrecognized};
use crate::config::{Settings, WorkerConfig};
use crate::error::{AppResult, QueueError};
use crate::executor::{ExecutorError, ExecutorFactory, PlanExecutor};
use crate::messages::{Command, StatusEvent};
use crate::run_state::{RunState, RunStateReader, RunStateWriter};
use crate::scan::{Plan, ScanRequest};

/// Hosts a plan executor and processes commands one at a time.
pub struct Worker {
    executor: Box<dyn PlanExecutor>,
    run_state: RunStateWriter,
    runtime: tokio::runtime::Runtime,
}

impl Worker {
    /// Build the worker's private runtime and executor context.
    ///
    /// Must be called on the thread that will run [`Worker::main_loop`], and not
    /// from inside another Tokio runtime.
    pub fn initialize(
        factory: Box<dyn ExecutorFactory>,
        run_state: RunStateWriter,
    ) -> AppResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| QueueError::WorkerInit(format!("runtime: {}", e)))?;

        let executor = {
            let _guard = runtime.enter();
            factory.create()
        }
        .map_err(|e| QueueError::WorkerInit(e.to_string()))?;

        run_state.set(RunState::Idle);
        info!("Scan worker initialized");

        Ok(Self {
            executor,
            run_state,
            runtime,
        })
    }

    /// Receive and execute commands until terminated or the command side closes.
    pub fn main_loop<S, K>(&mut self, source: &mut S, sink: &mut K) -> AppResult<()>
    where
        S: CommandSource,
        K: StatusSink,
    {
        while let Some(inbound) = source.next_command() {
            match inbound {
                Ok(Command::Terminate) => {
                    info!("Terminate received; scan worker exiting");
                    return Ok(());
                }
                Ok(Command::Scan(request)) => self.handle(&request, sink)?,
                Err(Unrecognized { reason, payload }) => {
                    warn!(%reason, "Unrecognized command");
                    sink.emit(StatusEvent::Failed {
                        error: format!("unrecognized command: {}", reason),
                        trace: Some(payload),
                    })?;
                }
            }
        }
        info!("Command channel closed; scan worker exiting");
        Ok(())
    }

    fn handle<K: StatusSink>(&mut self, request: &ScanRequest, sink: &mut K) -> AppResult<()> {
        self.run_state.set(RunState::Running);
        if let Err(e) = sink.emit(StatusEvent::Running {
            request_id: request.id(),
            name: request.name().to_string(),
        }) {
            self.run_state.set(RunState::Idle);
            return Err(e);
        }

        let outcome = self.execute(request);
        self.run_state.set(RunState::Idle);

        match outcome {
            Ok(()) => {
                info!(request_id = %request.id(), name = request.name(), "Scan completed");
                sink.emit(StatusEvent::Completed)
            }
            Err(failure) => {
                error!(request_id = %request.id(), name = request.name(), error = %failure.message, "Scan failed");
                sink.emit(StatusEvent::Failed {
                    error: failure.message,
                    trace: Some(failure.trace),
                })
            }
        }
    }

    fn execute(&mut self, request: &ScanRequest) -> Result<(), Failure> {
        let executor = &mut self.executor;
        let result = self
            .runtime
            .block_on(AssertUnwindSafe(executor.execute(request)).catch_unwind());

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Failure::from_error(&e, request)),
            Err(panic) => Err(Failure::from_panic(panic, request)),
        }
    }
}

/// A scan failure as it will appear on the status channel.
#[derive(Debug)]
struct Failure {
    message: String,
    trace: String,
}

impl Failure {
    fn context(request: &ScanRequest) -> String {
        format!(
            "while executing {} '{}' ({})",
            Plan::select(request).kind,
            request.name(),
            request.id()
        )
    }

    fn from_error(err: &ExecutorError, request: &ScanRequest) -> Self {
        let mut trace = vec![Self::context(request), err.to_string()];
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            trace.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            trace: trace.join("\n"),
        }
    }

    fn from_panic(panic: Box<dyn Any + Send>, request: &ScanRequest) -> Self {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self {
            message: format!("scan panicked: {}", detail),
            trace: format!("{}\npanic: {}", Self::context(request), detail),
        }
    }
}

/// How to bring up the worker.
pub enum WorkerSpawn {
    /// Run on a dedicated thread with an executor built there by `factory`.
    Thread(Box<dyn ExecutorFactory>),
    /// Run `program worker` as a child process; it builds its own simulated
    /// executor from `settings`.
    Process {
        /// Path to the `maia_daq` binary.
        program: PathBuf,
        /// Settings handed to the child on its command line.
        settings: Settings,
    },
}

impl std::fmt::Debug for WorkerSpawn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerSpawn::Thread(_) => f.write_str("WorkerSpawn::Thread"),
            WorkerSpawn::Process { program, .. } => f
                .debug_struct("WorkerSpawn::Process")
                .field("program", program)
                .finish(),
        }
    }
}

enum Host {
    Thread(thread::ThreadWorker),
    Process(process::ProcessWorker),
}

/// Controller-side handle to a running worker.
pub struct WorkerHandle {
    host: Host,
    run_state: RunStateReader,
}

impl WorkerHandle {
    /// Start a worker and return its handle and the controller's channel endpoints.
    ///
    /// Process spawning needs a Tokio runtime context.
    pub fn spawn(spawn: WorkerSpawn, config: &WorkerConfig) -> AppResult<(Self, ControllerEnd)> {
        match spawn {
            WorkerSpawn::Thread(factory) => {
                let (worker, end, run_state) = thread::spawn(factory, config)?;
                Ok((
                    Self {
                        host: Host::Thread(worker),
                        run_state,
                    },
                    end,
                ))
            }
            WorkerSpawn::Process { program, settings } => {
                let (worker, end, run_state) = process::spawn(&program, &settings)?;
                Ok((
                    Self {
                        host: Host::Process(worker),
                        run_state,
                    },
                    end,
                ))
            }
        }
    }

    /// Read side of the worker's run state.
    pub fn run_state(&self) -> RunStateReader {
        self.run_state.clone()
    }

    /// OS process id of a process-hosted worker, `None` for a thread.
    pub fn process_id(&self) -> Option<u32> {
        match &self.host {
            Host::Thread(_) => None,
            Host::Process(worker) => worker.pid(),
        }
    }

    /// Wait for the worker to exit. Send [`Command::Terminate`] first.
    pub async fn join(self) -> AppResult<()> {
        match self.host {
            Host::Thread(worker) => worker.join().await,
            Host::Process(worker) => worker.join().await,
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let host = match self.host {
            Host::Thread(_) => "thread",
            Host::Process(_) => "process",
        };
        f.debug_struct("WorkerHandle")
            .field("host", &host)
            .field("run_state", &self.run_state.get())
            .finish()
    }
}
