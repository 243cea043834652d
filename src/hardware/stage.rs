//! Sample positioning: jog the stage by fixed steps and keep a list of named
//! positions the operator can return to.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::{Axis, Stage};
use crate::config::StageConfig;
use crate::scan::OrderedQueue;

const MAX_NUDGE_STEP: f64 = 5000.0;
const MAX_FOCUS_STEP: f64 = 100.0;

/// Jog direction as seen on the sample camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeDirection {
    /// +y
    Up,
    /// -y
    Down,
    /// -x
    Left,
    /// +x
    Right,
    /// Focus in (+z)
    In,
    /// Focus out (-z)
    Out,
}

/// A named x/y/z stage position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPosition {
    /// Operator-given label.
    pub name: String,
    /// Stage x when saved.
    pub x: f64,
    /// Stage y when saved.
    pub y: f64,
    /// Stage z when saved.
    pub z: f64,
}

/// Jog controls and saved positions for the sample stage.
pub struct SampleControl {
    stage: Stage,
    nudge_step: f64,
    focus_step: f64,
    positions: OrderedQueue<SavedPosition>,
}

impl SampleControl {
    /// Jog `stage` with the step sizes from `config`, clamped to their limits.
    pub fn new(stage: Stage, config: &StageConfig) -> Self {
        Self {
            stage,
            nudge_step: config.nudge_step.clamp(0.0, MAX_NUDGE_STEP),
            focus_step: config.focus_step.clamp(0.0, MAX_FOCUS_STEP),
            positions: OrderedQueue::new(),
        }
    }

    /// The controlled stage.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Lateral step, clamped to 0..=5000.
    pub fn set_nudge_step(&mut self, step: f64) {
        self.nudge_step = step.clamp(0.0, MAX_NUDGE_STEP);
    }

    /// Focus step, clamped to 0..=100.
    pub fn set_focus_step(&mut self, step: f64) {
        self.focus_step = step.clamp(0.0, MAX_FOCUS_STEP);
    }

    /// Lateral jog step.
    pub fn nudge_step(&self) -> f64 {
        self.nudge_step
    }

    /// Focus jog step.
    pub fn focus_step(&self) -> f64 {
        self.focus_step
    }

    fn jog_target(&self, direction: NudgeDirection) -> (&Arc<dyn Axis>, f64) {
        match direction {
            NudgeDirection::Up => (&self.stage.y, self.nudge_step),
            NudgeDirection::Down => (&self.stage.y, -self.nudge_step),
            NudgeDirection::Left => (&self.stage.x, -self.nudge_step),
            NudgeDirection::Right => (&self.stage.x, self.nudge_step),
            NudgeDirection::In => (&self.stage.z, self.focus_step),
            NudgeDirection::Out => (&self.stage.z, -self.focus_step),
        }
    }

    /// Move one step in `direction`; returns the axis position afterwards.
    pub async fn nudge(&self, direction: NudgeDirection) -> Result<f64> {
        let (axis, distance) = self.jog_target(direction);
        axis.move_rel(distance)
            .await
            .with_context(|| format!("nudge {:?} on axis {}", direction, axis.name()))?;
        axis.position().await
    }

    /// Record the current x/y/z under `name` at the end of the saved list.
    pub async fn save_position(&mut self, name: impl Into<String>) -> Result<SavedPosition> {
        let position = SavedPosition {
            name: name.into(),
            x: self.stage.x.position().await?,
            y: self.stage.y.position().await?,
            z: self.stage.z.position().await?,
        };
        info!(name = %position.name, x = position.x, y = position.y, z = position.z, "Saved stage position");
        self.positions.enqueue(position.clone());
        Ok(position)
    }

    /// Drive x, y and z back to a saved position.
    pub async fn move_to(&self, position: &SavedPosition) -> Result<()> {
        self.stage.x.set_position(position.x).await?;
        self.stage.y.set_position(position.y).await?;
        self.stage.z.set_position(position.z).await?;
        Ok(())
    }

    /// Saved positions, oldest first.
    pub fn positions(&self) -> &OrderedQueue<SavedPosition> {
        &self.positions
    }

    /// Saved positions are reordered and removed with the same rules as the scan queue.
    pub fn positions_mut(&mut self) -> &mut OrderedQueue<SavedPosition> {
        &mut self.positions
    }

    /// Readback subscriptions for x, y and z.
    pub fn readback(&self) -> [watch::Receiver<f64>; 3] {
        [
            self.stage.x.subscribe(),
            self.stage.y.subscribe(),
            self.stage.z.subscribe(),
        ]
    }
}
