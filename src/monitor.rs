//! Status Monitor: relays worker status events to listeners.
//!
//! The monitor is a single task that drains the status side of the worker
//! channel as fast as events arrive and republishes each one, in receipt order,
//! to two places:
//!
//! - a `broadcast` channel for any number of external listeners (UI, logs).
//!   Broadcasting never waits on a receiver; a listener that falls more than the
//!   configured capacity behind loses the oldest events and is told so.
//! - an unbounded acknowledgment queue consumed by the active queue runner,
//!   which must never miss an event.
//!
//! Neither output can push back into the worker channel, so a slow listener can
//! never stall the worker's next status send. When the worker side closes, the
//! monitor clears its connected flag, closes the acknowledgment queue, publishes
//! [`MonitorEvent::Disconnected`] and exits. The flag is cleared first, so anyone
//! who sees the ack queue end also sees the monitor as disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::messages::StatusEvent;

/// What listeners receive.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A status event from the worker, in order.
    Status(StatusEvent),
    /// The worker's status stream has ended.
    Disconnected,
}

/// Handle to the running relay task.
pub struct StatusMonitor {
    listeners: broadcast::Sender<MonitorEvent>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl StatusMonitor {
    /// Start relaying. Returns the monitor and the acknowledgment queue receiver.
    pub fn spawn(
        mut status: mpsc::Receiver<StatusEvent>,
        listener_capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (listeners, _) = broadcast::channel(listener_capacity);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let connected = Arc::new(AtomicBool::new(true));

        let relay = listeners.clone();
        let flag = connected.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = status.recv().await {
                debug!(status = event.label(), "Relaying status event");
                // The runner may not exist between runs; that is fine.
                let _ = ack_tx.send(event.clone());
                let _ = relay.send(MonitorEvent::Status(event));
            }
            flag.store(false, Ordering::Release);
            drop(ack_tx);
            warn!("Worker status stream closed");
            let _ = relay.send(MonitorEvent::Disconnected);
        });

        (
            Self {
                listeners,
                connected,
                task,
            },
            ack_rx,
        )
    }

    /// Subscribe to every event relayed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.listeners.subscribe()
    }

    /// Whether the worker's status stream is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Wait for the relay to drain and exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Status monitor task failed: {}", e);
        }
    }
}

impl std::fmt::Debug for StatusMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusMonitor")
            .field("listeners", &self.listeners.receiver_count())
            .field("connected", &self.is_connected())
            .finish()
    }
}
