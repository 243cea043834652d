//! Thread-hosted worker.
//!
//! The worker gets its own OS thread and its own single-threaded runtime, so a
//! scan that blocks (or spins) never starves the controller's runtime. Panics
//! inside a scan are caught per item by the worker loop itself.

use tracing::{debug, error};

use super::Worker;
use crate::channel::{self, ControllerEnd, WorkerEnd};
use crate::config::WorkerConfig;
use crate::error::{AppResult, QueueError};
use crate::executor::ExecutorFactory;
use crate::run_state::{self, RunStateReader};

const THREAD_NAME: &str = "maia-scan-worker";

pub(crate) struct ThreadWorker {
    handle: std::thread::JoinHandle<AppResult<()>>,
}

pub(crate) fn spawn(
    factory: Box<dyn ExecutorFactory>,
    config: &WorkerConfig,
) -> AppResult<(ThreadWorker, ControllerEnd, RunStateReader)> {
    let (controller, worker_end) = channel::pair(config.command_capacity, config.status_capacity);
    let (writer, reader) = run_state::local();

    let handle = std::thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || -> AppResult<()> {
            let WorkerEnd {
                mut commands,
                mut status,
            } = worker_end;
            let mut worker = Worker::initialize(factory, writer).map_err(|e| {
                error!("Scan worker failed to start: {}", e);
                e
            })?;
            worker.main_loop(&mut commands, &mut status)
        })
        .map_err(|e| QueueError::WorkerSpawn(e.to_string()))?;

    debug!(thread = THREAD_NAME, "Scan worker thread spawned");
    Ok((ThreadWorker { handle }, controller, reader))
}

impl ThreadWorker {
    pub(crate) async fn join(self) -> AppResult<()> {
        let handle = self.handle;
        let joined = tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|e| QueueError::WorkerExited(e.to_string()))?;
        match joined {
            Ok(result) => result,
            Err(_) => Err(QueueError::WorkerExited(
                "worker thread panicked".to_string(),
            )),
        }
    }
}
