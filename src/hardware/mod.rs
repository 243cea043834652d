//! Device collaborators for the sample stage.
//!
//! The stage is four motor axes (x, y, z focus, r rotation). Each axis offers the
//! same minimal contract: read the position, command a new one, and subscribe to
//! position changes. Scan plans drive x/y; the jog controls in [`stage`] move any
//! axis by a fixed step.
//!
//! # Available Implementations
//!
//! - [`mock::SimulatedAxis`] - software axis with realistic timing and soft limits

pub mod mock;
pub mod stage;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::ExecutorConfig;
use mock::SimulatedAxis;

/// A single motor axis.
#[async_trait]
pub trait Axis: Send + Sync {
    /// Axis label, e.g. "x".
    fn name(&self) -> &str;

    /// Current readback position.
    async fn position(&self) -> Result<f64>;

    /// Move to an absolute position and wait until settled.
    async fn set_position(&self, target: f64) -> Result<()>;

    /// Move by a relative distance.
    async fn move_rel(&self, distance: f64) -> Result<()> {
        let current = self.position().await?;
        self.set_position(current + distance).await
    }

    /// Receive every position update. The receiver starts at the current value.
    fn subscribe(&self) -> watch::Receiver<f64>;
}

/// The sample stage: lateral x/y, focus z, rotation r.
#[derive(Clone)]
pub struct Stage {
    /// Lateral x.
    pub x: Arc<dyn Axis>,
    /// Lateral y.
    pub y: Arc<dyn Axis>,
    /// Focus.
    pub z: Arc<dyn Axis>,
    /// Rotation.
    pub r: Arc<dyn Axis>,
}

impl Stage {
    /// Stage built from simulated axes tuned by the executor settings.
    pub fn simulated(config: &ExecutorConfig) -> Self {
        let axis = |name: &str| -> Arc<dyn Axis> {
            Arc::new(
                SimulatedAxis::new(name)
                    .with_speed(config.speed_mm_per_sec)
                    .with_settle(std::time::Duration::from_millis(config.settle_ms)),
            )
        };
        Self {
            x: axis("x"),
            y: axis("y"),
            z: axis("z"),
            r: axis("r"),
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("x", &self.x.name())
            .field("y", &self.y.name())
            .field("z", &self.z.name())
            .field("r", &self.r.name())
            .finish()
    }
}
