//! Queue Runner: dispatches one queue snapshot to the worker.
//!
//! A runner is created per run and consumed by [`QueueRunner::run`]. It sends
//! one [`Command::Scan`] at a time and does not send the next until the worker
//! has acknowledged the current one with a terminal status event. Because the
//! channel is FIFO and only one command is ever in flight, the first terminal
//! event after a send always belongs to that send.
//!
//! Between items the runner honours the controller's [`RunControl`]:
//!
//! ```text
//! send item N ──► await Completed/Failed ──► paused? park until resumed or stopped
//!                                                 │
//!                          stopped? ── yes ──► leave items N+1.. undispatched
//!                                   ── no  ──► send item N+1
//! ```
//!
//! Pausing never interrupts the scan in flight; it only holds back the next send.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{AppResult, QueueError};
use crate::messages::{Command, StatusEvent};
use crate::scan::{RequestId, ScanRequest};

/// Per-item progress, as shown next to each queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemState {
    /// Not part of the scan queue.
    #[default]
    NotQueued,
    /// Waiting in the queue or in a run snapshot.
    Queued,
    /// Sent to the worker and acknowledged as running.
    Collecting,
    /// Last execution completed.
    Complete,
    /// Last execution failed.
    Failed,
}

/// Pause/stop flags, written by the controller and observed by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunControl {
    /// Hold the next item until cleared.
    pub paused: bool,
    /// Leave the remaining items undispatched.
    pub stopped: bool,
}

/// Shared per-request progress map.
pub type Progress = Arc<watch::Sender<HashMap<RequestId, ItemState>>>;

/// Outcome of one dispatched item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// The worker reported `Completed`.
    Completed,
    /// The worker reported `Failed`.
    Failed {
        /// Error message from the worker.
        error: String,
        /// Error chain or panic payload, when available.
        trace: Option<String>,
    },
}

/// One line of a [`RunReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    /// Id of the dispatched request.
    pub request_id: RequestId,
    /// Name of the dispatched request.
    pub name: String,
    /// How the worker acknowledged it.
    pub outcome: ItemOutcome,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Dispatched items, in dispatch order.
    pub items: Vec<ItemReport>,
    /// Snapshot items never sent because the run was stopped.
    pub undispatched: Vec<RequestId>,
    /// Whether the run ended on a stop rather than by exhausting the snapshot.
    pub stopped: bool,
}

impl RunReport {
    /// Number of items acknowledged as completed.
    pub fn completed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome == ItemOutcome::Completed)
            .count()
    }

    /// Number of items acknowledged as failed.
    pub fn failed(&self) -> usize {
        self.items.len() - self.completed()
    }
}

/// Ephemeral dispatch session over a queue snapshot.
pub struct QueueRunner {
    snapshot: Vec<ScanRequest>,
    commands: mpsc::Sender<Command>,
    acks: Arc<Mutex<mpsc::UnboundedReceiver<StatusEvent>>>,
    control: watch::Receiver<RunControl>,
    progress: Progress,
}

impl QueueRunner {
    /// A runner over `snapshot`, talking to the worker through `commands` and `acks`.
    pub fn new(
        snapshot: Vec<ScanRequest>,
        commands: mpsc::Sender<Command>,
        acks: Arc<Mutex<mpsc::UnboundedReceiver<StatusEvent>>>,
        control: watch::Receiver<RunControl>,
        progress: Progress,
    ) -> Self {
        Self {
            snapshot,
            commands,
            acks,
            control,
            progress,
        }
    }

    /// Dispatch the snapshot in order until it is exhausted or stop is observed.
    ///
    /// Returns [`QueueError::ChannelClosed`] if the worker goes away mid-run.
    pub async fn run(mut self) -> AppResult<RunReport> {
        let shared = self.acks.clone();
        let mut acks = shared.lock().await;
        while let Ok(stale) = acks.try_recv() {
            debug!(status = stale.label(), "Discarding status event from before this run");
        }

        self.progress.send_modify(|map| {
            for request in &self.snapshot {
                map.insert(request.id(), ItemState::Queued);
            }
        });

        info!(items = self.snapshot.len(), "Queue run started");
        let mut report = RunReport::default();
        let snapshot = std::mem::take(&mut self.snapshot);
        let mut pending = snapshot.into_iter().peekable();

        while let Some(request) = pending.next() {
            info!(request_id = %request.id(), name = request.name(), "Dispatching scan");
            let request_id = request.id();
            let name = request.name().to_string();
            self.commands
                .send(Command::Scan(request))
                .await
                .map_err(|_| QueueError::ChannelClosed("command channel closed".to_string()))?;

            let outcome = self.await_ack(&mut acks, request_id).await?;
            let state = match outcome {
                ItemOutcome::Completed => ItemState::Complete,
                ItemOutcome::Failed { .. } => ItemState::Failed,
            };
            self.set_progress(request_id, state);
            report.items.push(ItemReport {
                request_id,
                name,
                outcome,
            });

            if pending.peek().is_none() {
                break;
            }
            if self.hold_while_paused().await {
                report.stopped = true;
                report.undispatched = pending.map(|r| r.id()).collect();
                info!(
                    remaining = report.undispatched.len(),
                    "Queue run stopped; remaining items left in queue"
                );
                return Ok(report);
            }
        }

        info!(
            completed = report.completed(),
            failed = report.failed(),
            "Queue run finished"
        );
        Ok(report)
    }

    /// Wait for the terminal status of the command just sent.
    async fn await_ack(
        &self,
        acks: &mut mpsc::UnboundedReceiver<StatusEvent>,
        request_id: RequestId,
    ) -> AppResult<ItemOutcome> {
        loop {
            match acks.recv().await {
                Some(StatusEvent::Running { request_id: id, .. }) => {
                    if id == request_id {
                        self.set_progress(id, ItemState::Collecting);
                    } else {
                        warn!(expected = %request_id, got = %id, "Running event for unexpected request");
                    }
                }
                Some(StatusEvent::Completed) => return Ok(ItemOutcome::Completed),
                Some(StatusEvent::Failed { error, trace }) => {
                    return Ok(ItemOutcome::Failed { error, trace })
                }
                None => {
                    return Err(QueueError::ChannelClosed(
                        "status stream ended before the scan was acknowledged".to_string(),
                    ))
                }
            }
        }
    }

    /// Park while paused. Returns `true` if the run should stop.
    async fn hold_while_paused(&mut self) -> bool {
        if self.control.borrow().paused {
            info!("Queue run paused between items");
        }
        match self.control.wait_for(|c| !c.paused || c.stopped).await {
            Ok(control) => control.stopped,
            // Controller gone: nobody can resume us.
            Err(_) => true,
        }
    }

    fn set_progress(&self, id: RequestId, state: ItemState) {
        self.progress.send_modify(|map| {
            map.insert(id, state);
        });
    }
}

impl std::fmt::Debug for QueueRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRunner")
            .field("items", &self.snapshot.len())
            .field("control", &*self.control.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    /// Answers every scan in-process; names starting with "bad" fail.
    fn fake_worker(
        mut commands: mpsc::Receiver<Command>,
        acks: mpsc::UnboundedSender<StatusEvent>,
        sent: Arc<std::sync::Mutex<Vec<String>>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(Command::Scan(request)) = commands.recv().await {
                sent.lock().unwrap().push(request.name().to_string());
                let _ = acks.send(StatusEvent::Running {
                    request_id: request.id(),
                    name: request.name().to_string(),
                });
                let status = if request.name().starts_with("bad") {
                    StatusEvent::Failed {
                        error: "stage fault".into(),
                        trace: None,
                    }
                } else {
                    StatusEvent::Completed
                };
                let _ = acks.send(status);
            }
        })
    }

    struct Harness {
        commands: mpsc::Sender<Command>,
        acks: Arc<Mutex<mpsc::UnboundedReceiver<StatusEvent>>>,
        control: watch::Sender<RunControl>,
        progress: Progress,
        sent: Arc<std::sync::Mutex<Vec<String>>>,
    }

    fn harness() -> Harness {
        let (command_tx, command_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        fake_worker(command_rx, ack_tx, sent.clone());
        let (control, _) = watch::channel(RunControl::default());
        Harness {
            commands: command_tx,
            acks: Arc::new(Mutex::new(ack_rx)),
            control,
            progress: Arc::new(watch::channel(HashMap::new()).0),
            sent,
        }
    }

    impl Harness {
        fn runner(&self, names: &[&str]) -> (QueueRunner, Vec<ScanRequest>) {
            let snapshot: Vec<_> = names
                .iter()
                .map(|n| ScanRequest::builder(*n).build())
                .collect();
            let runner = QueueRunner::new(
                snapshot.clone(),
                self.commands.clone(),
                self.acks.clone(),
                self.control.subscribe(),
                self.progress.clone(),
            );
            (runner, snapshot)
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_items() {
        let h = harness();
        let (runner, snapshot) = h.runner(&["a", "bad_b", "c"]);

        let report = runner.run().await.unwrap();

        assert_eq!(*h.sent.lock().unwrap(), vec!["a", "bad_b", "c"]);
        assert_eq!(report.completed(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.stopped);
        assert!(report.undispatched.is_empty());

        let progress = h.progress.borrow();
        assert_eq!(progress[&snapshot[0].id()], ItemState::Complete);
        assert_eq!(progress[&snapshot[1].id()], ItemState::Failed);
        assert_eq!(progress[&snapshot[2].id()], ItemState::Complete);
    }

    #[tokio::test]
    async fn test_stop_while_paused_leaves_rest_undispatched() {
        let h = harness();
        let (runner, snapshot) = h.runner(&["a", "b", "c"]);
        // paused before the run starts: "a" is still sent, nothing after it
        h.control.send_modify(|c| c.paused = true);

        let task = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*h.sent.lock().unwrap(), vec!["a"]);

        h.control.send_modify(|c| c.stopped = true);
        let report = timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(report.stopped);
        assert_eq!(report.items.len(), 1);
        assert_eq!(
            report.undispatched,
            vec![snapshot[1].id(), snapshot[2].id()]
        );
        assert_eq!(*h.sent.lock().unwrap(), vec!["a"]);
        assert_eq!(h.progress.borrow()[&snapshot[2].id()], ItemState::Queued);
    }

    #[tokio::test]
    async fn test_resume_continues_dispatch() {
        let h = harness();
        let (runner, _) = h.runner(&["a", "b"]);
        h.control.send_modify(|c| c.paused = true);

        let task = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.control.send_modify(|c| c.paused = false);

        let report = timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.completed(), 2);
        assert_eq!(*h.sent.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_pause_after_last_item_does_not_hang() {
        let h = harness();
        let (runner, _) = h.runner(&["only"]);
        h.control.send_modify(|c| c.paused = true);

        let report = timeout(Duration::from_secs(5), runner.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.completed(), 1);
        assert!(!report.stopped);
    }

    #[tokio::test]
    async fn test_stale_acks_are_discarded() {
        let (command_tx, command_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        ack_tx
            .send(StatusEvent::Failed {
                error: "left over".into(),
                trace: None,
            })
            .unwrap();
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        fake_worker(command_rx, ack_tx, sent);

        let (_control, control_rx) = watch::channel(RunControl::default());
        let runner = QueueRunner::new(
            vec![ScanRequest::builder("fresh").build()],
            command_tx,
            Arc::new(Mutex::new(ack_rx)),
            control_rx,
            Arc::new(watch::channel(HashMap::new()).0),
        );

        let report = runner.run().await.unwrap();
        assert_eq!(report.items[0].outcome, ItemOutcome::Completed);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_running_event_for_other_request_is_logged() {
        let (command_tx, mut command_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(Command::Scan(_)) = command_rx.recv().await {
                let _ = ack_tx.send(StatusEvent::Running {
                    request_id: RequestId::new(),
                    name: "someone else".into(),
                });
                let _ = ack_tx.send(StatusEvent::Completed);
            }
        });

        let (_control, control_rx) = watch::channel(RunControl::default());
        let request = ScanRequest::builder("mine").build();
        let progress: Progress = Arc::new(watch::channel(HashMap::new()).0);
        let runner = QueueRunner::new(
            vec![request.clone()],
            command_tx,
            Arc::new(Mutex::new(ack_rx)),
            control_rx,
            progress.clone(),
        );

        let report = runner.run().await.unwrap();
        assert_eq!(report.completed(), 1);
        assert_eq!(progress.borrow()[&request.id()], ItemState::Complete);
        assert!(logs_contain("Running event for unexpected request"));
    }

    #[tokio::test]
    async fn test_worker_gone_is_channel_closed() {
        let (command_tx, command_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel::<StatusEvent>();
        drop(command_rx);
        drop(ack_tx);

        let (_control, control_rx) = watch::channel(RunControl::default());
        let runner = QueueRunner::new(
            vec![ScanRequest::builder("s1").build()],
            command_tx,
            Arc::new(Mutex::new(ack_rx)),
            control_rx,
            Arc::new(watch::channel(HashMap::new()).0),
        );

        let err = runner.run().await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
