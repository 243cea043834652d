//! Operator-facing controller.
//!
//! The [`Controller`] owns the scan queue, the worker handle and the status
//! monitor. It hands each run to a [`QueueRunner`] on a background task, so
//! [`Controller::run`] returns immediately, and it is the only writer of the
//! runner's pause/stop flags.
//!
//! ## State
//!
//! The state shown to the operator combines two sources:
//!
//! | runner          | worker run state | reported  |
//! |-----------------|------------------|-----------|
//! | active, paused  | any              | `Paused`  |
//! | active          | any              | `Running` |
//! | none            | `Running`        | `Running` |
//! | none            | `Idle`           | `Idle`    |
//! | none, worker gone | ignored        | `Idle`    |
//!
//! Pause is accepted only while `Running`, stop and resume only while `Paused`.
//! Once the worker has disconnected every button is disabled and
//! [`Controller::run`] reports the disconnect as an error.

use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::{AppResult, QueueError};
use crate::messages::{Command, StatusEvent};
use crate::monitor::{MonitorEvent, StatusMonitor};
use crate::run_state::{RunState, RunStateReader};
use crate::runner::{ItemState, Progress, QueueRunner, RunControl, RunReport};
use crate::scan::{RequestId, ScanQueue};
use crate::worker::{WorkerHandle, WorkerSpawn};

/// Button enablement and labels for the run/pause controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPanel {
    /// Whether the run button accepts a press.
    pub run_enabled: bool,
    /// "Run" or "Resume".
    pub run_label: &'static str,
    /// Whether the pause button accepts a press.
    pub pause_enabled: bool,
    /// "Pause" or "Stop".
    pub pause_label: &'static str,
}

impl ControlPanel {
    /// Idle: run. Running: pause. Paused: resume or stop.
    pub fn for_state(state: RunState) -> Self {
        match state {
            RunState::Idle => Self {
                run_enabled: true,
                run_label: "Run",
                pause_enabled: false,
                pause_label: "Pause",
            },
            RunState::Running => Self {
                run_enabled: false,
                run_label: "Run",
                pause_enabled: true,
                pause_label: "Pause",
            },
            RunState::Paused => Self {
                run_enabled: true,
                run_label: "Resume",
                pause_enabled: true,
                pause_label: "Stop",
            },
        }
    }

    /// Worker gone: nothing can be started or paused.
    pub fn disconnected() -> Self {
        Self {
            run_enabled: false,
            run_label: "Run",
            pause_enabled: false,
            pause_label: "Pause",
        }
    }
}

struct ActiveRun {
    control: watch::Sender<RunControl>,
    task: JoinHandle<AppResult<RunReport>>,
}

/// Owns the queue and drives runs against an isolated worker.
pub struct Controller {
    queue: ScanQueue,
    commands: mpsc::Sender<Command>,
    acks: Arc<Mutex<mpsc::UnboundedReceiver<StatusEvent>>>,
    worker: WorkerHandle,
    run_state: RunStateReader,
    monitor: StatusMonitor,
    progress: Progress,
    active: Option<ActiveRun>,
}

impl Controller {
    /// Spawn the worker and start relaying its status.
    ///
    /// Must be called from within a Tokio runtime. `settings` are validated
    /// first, so a zero channel capacity is a configuration error.
    pub fn start(settings: &Settings, spawn: WorkerSpawn) -> AppResult<Self> {
        settings.validate()?;
        let (worker, end) = WorkerHandle::spawn(spawn, &settings.worker)?;
        let (monitor, acks) = StatusMonitor::spawn(end.status, settings.worker.listener_capacity);
        let run_state = worker.run_state();
        info!(?worker, "Controller started");

        Ok(Self {
            queue: ScanQueue::new(),
            commands: end.commands,
            acks: Arc::new(Mutex::new(acks)),
            worker,
            run_state,
            monitor,
            progress: Arc::new(watch::channel(HashMap::new()).0),
            active: None,
        })
    }

    /// The current queue.
    pub fn queue(&self) -> &ScanQueue {
        &self.queue
    }

    /// Edit the queue. Edits never affect a run already in progress.
    pub fn queue_mut(&mut self) -> &mut ScanQueue {
        &mut self.queue
    }

    /// Subscribe to relayed status events.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.monitor.subscribe()
    }

    /// Raw worker run state, without the controller's pause overlay.
    pub fn run_state(&self) -> RunStateReader {
        self.run_state.clone()
    }

    /// Whether the worker's status stream is still open.
    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    /// Process id of a process-hosted worker.
    pub fn worker_pid(&self) -> Option<u32> {
        self.worker.process_id()
    }

    /// State as presented to the operator.
    ///
    /// Once the worker is disconnected its last recorded run state is stale
    /// (a killed worker never writes `Idle`), so it is reported as `Idle`.
    pub fn state(&self) -> RunState {
        match &self.active {
            Some(run) if !run.task.is_finished() => {
                if run.control.borrow().paused {
                    RunState::Paused
                } else {
                    RunState::Running
                }
            }
            _ if !self.is_connected() => RunState::Idle,
            _ => self.run_state.get(),
        }
    }

    /// Button state for the current state.
    pub fn panel(&self) -> ControlPanel {
        if !self.is_connected() {
            return ControlPanel::disconnected();
        }
        ControlPanel::for_state(self.state())
    }

    /// Start a run over a snapshot of the current queue.
    ///
    /// Returns `Ok(false)` without doing anything if the state is not `Idle` or
    /// the queue is empty, and [`QueueError::ChannelClosed`] if the worker is gone.
    pub fn run(&mut self) -> AppResult<bool> {
        if !self.is_connected() {
            let err = QueueError::ChannelClosed("worker is disconnected".to_string());
            error!("Run rejected: {}", err);
            return Err(err);
        }
        let state = self.state();
        if state != RunState::Idle {
            warn!(%state, "Run rejected: not idle");
            return Ok(false);
        }
        if self.queue.is_empty() {
            info!("Run ignored: queue is empty");
            return Ok(false);
        }
        self.reap_finished();

        let queued: HashSet<RequestId> = self.queue.iter().map(|r| r.id()).collect();
        self.progress
            .send_modify(|map| map.retain(|id, _| queued.contains(id)));

        let (control, control_rx) = watch::channel(RunControl::default());
        let runner = QueueRunner::new(
            self.queue.snapshot(),
            self.commands.clone(),
            self.acks.clone(),
            control_rx,
            self.progress.clone(),
        );
        let task = tokio::spawn(runner.run());
        self.active = Some(ActiveRun { control, task });
        Ok(true)
    }

    /// Hold the run before its next item. The scan in flight is not interrupted.
    pub fn pause(&mut self) -> bool {
        if self.state() != RunState::Running {
            return false;
        }
        match &self.active {
            Some(run) => {
                run.control.send_modify(|c| c.paused = true);
                info!("Run paused");
                true
            }
            None => false,
        }
    }

    /// Release a paused run.
    pub fn resume(&mut self) -> bool {
        self.update_paused_run(|c| c.paused = false, "Run resumed")
    }

    /// Abandon the rest of a paused run. Undispatched items stay queued.
    pub fn stop(&mut self) -> bool {
        self.update_paused_run(|c| c.stopped = true, "Run stopped")
    }

    /// The run button: run when idle, resume when paused.
    pub fn press_run(&mut self) -> AppResult<bool> {
        match self.state() {
            RunState::Idle => self.run(),
            RunState::Paused => Ok(self.resume()),
            RunState::Running => Ok(false),
        }
    }

    /// The pause button: pause when running, stop when paused.
    pub fn press_pause(&mut self) -> bool {
        match self.state() {
            RunState::Running => self.pause(),
            RunState::Paused => self.stop(),
            RunState::Idle => false,
        }
    }

    fn update_paused_run(&mut self, update: impl FnOnce(&mut RunControl), action: &str) -> bool {
        if self.state() != RunState::Paused {
            return false;
        }
        match &self.active {
            Some(run) => {
                run.control.send_modify(update);
                info!("{}", action);
                true
            }
            None => false,
        }
    }

    /// Wait for the current run to end and return its report.
    ///
    /// Returns `None` if there is no run to wait for.
    pub async fn wait_for_run(&mut self) -> Option<AppResult<RunReport>> {
        let run = self.active.take()?;
        Some(Self::finish(run.task).await)
    }

    async fn finish(task: JoinHandle<AppResult<RunReport>>) -> AppResult<RunReport> {
        match task.await {
            Ok(result) => {
                if let Err(e) = &result {
                    error!("Queue run aborted: {}", e);
                }
                result
            }
            Err(e) => Err(QueueError::ChannelClosed(format!("queue runner task failed: {}", e))),
        }
    }

    /// Drop a finished run whose report nobody collected.
    fn reap_finished(&mut self) {
        if let Some(run) = self.active.take() {
            match run.task.now_or_never() {
                Some(Ok(Ok(report))) => info!(
                    completed = report.completed(),
                    failed = report.failed(),
                    "Discarding uncollected run report"
                ),
                Some(Ok(Err(e))) => warn!("Previous run ended with error: {}", e),
                Some(Err(e)) => warn!("Previous run task failed: {}", e),
                None => warn!("Previous run still active"),
            }
        }
    }

    /// Progress of one request.
    pub fn item_state(&self, id: RequestId) -> ItemState {
        if !self.queue.iter().any(|r| r.id() == id) {
            return ItemState::NotQueued;
        }
        self.progress
            .borrow()
            .get(&id)
            .copied()
            .unwrap_or(ItemState::Queued)
    }

    /// Progress of every queued request, in queue order.
    pub fn item_states(&self) -> Vec<(RequestId, ItemState)> {
        let progress = self.progress.borrow();
        self.queue
            .iter()
            .map(|r| {
                let state = progress.get(&r.id()).copied().unwrap_or(ItemState::Queued);
                (r.id(), state)
            })
            .collect()
    }

    /// Watch per-item progress as it changes.
    pub fn watch_progress(&self) -> watch::Receiver<HashMap<RequestId, ItemState>> {
        self.progress.subscribe()
    }

    /// Finish any run, terminate the worker and stop the monitor.
    ///
    /// A run in progress is stopped at its next item boundary; the scan in
    /// flight completes first.
    pub async fn shutdown(mut self) -> AppResult<()> {
        if let Some(run) = self.active.take() {
            run.control.send_modify(|c| {
                c.paused = false;
                c.stopped = true;
            });
            if let Err(e) = Self::finish(run.task).await {
                warn!("Run ended with error during shutdown: {}", e);
            }
        }

        let Self {
            commands,
            worker,
            monitor,
            ..
        } = self;

        if commands.send(Command::Terminate).await.is_err() {
            warn!("Worker already gone at shutdown");
        }
        drop(commands);

        let result = worker.join().await;
        monitor.join().await;
        info!("Controller shut down");
        result
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("queue", &self.queue.len())
            .field("state", &self.state())
            .field("worker", &self.worker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_panel_mapping() {
        let idle = ControlPanel::for_state(RunState::Idle);
        assert!(idle.run_enabled && !idle.pause_enabled);
        assert_eq!(idle.run_label, "Run");

        let running = ControlPanel::for_state(RunState::Running);
        assert!(!running.run_enabled && running.pause_enabled);
        assert_eq!(running.pause_label, "Pause");

        let paused = ControlPanel::for_state(RunState::Paused);
        assert!(paused.run_enabled && paused.pause_enabled);
        assert_eq!((paused.run_label, paused.pause_label), ("Resume", "Stop"));

        let gone = ControlPanel::disconnected();
        assert!(!gone.run_enabled && !gone.pause_enabled);
    }
}
