//! Mock Hardware Implementations
//!
//! Provides simulated stage axes for testing and for running plans without
//! physical hardware. All timing uses async-safe operations (tokio::time::sleep,
//! not std::thread::sleep).
//!
//! # Performance Characteristics
//!
//! - SimulatedAxis: 10mm/sec motion speed, 50ms settling time by default

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::trace;

use super::Axis;

/// Simulated motor axis with realistic timing
///
/// Simulates a linear axis with:
/// - configurable motion speed (default 10mm/sec)
/// - configurable settling time after motion (default 50ms)
/// - optional soft limits; a move outside them fails without moving
/// - position broadcast through a `watch` channel
///
/// # Example
///
/// ```rust,ignore
/// let axis = SimulatedAxis::new("x").with_speed(100.0);
/// axis.set_position(10.0).await?; // Takes ~100ms
/// assert_eq!(axis.position().await?, 10.0);
/// ```
pub struct SimulatedAxis {
    name: String,
    position: watch::Sender<f64>,
    speed_mm_per_sec: f64,
    settle: Duration,
    limits: Option<(f64, f64)>,
}

impl SimulatedAxis {
    /// Create new simulated axis at position 0.0mm
    pub fn new(name: impl Into<String>) -> Self {
        let (position, _) = watch::channel(0.0);
        Self {
            name: name.into(),
            position,
            speed_mm_per_sec: 10.0,
            settle: Duration::from_millis(50),
            limits: None,
        }
    }

    /// Motion speed in mm/sec. Non-positive values make moves instantaneous.
    pub fn with_speed(mut self, speed_mm_per_sec: f64) -> Self {
        self.speed_mm_per_sec = speed_mm_per_sec;
        self
    }

    /// Settling time after each move.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Soft limits, inclusive.
    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Some((min, max));
        self
    }

    /// Start at a given position.
    pub fn at(self, position: f64) -> Self {
        self.position.send_replace(position);
        self
    }

    fn travel_time(&self, distance: f64) -> Duration {
        if self.speed_mm_per_sec > 0.0 {
            Duration::try_from_secs_f64(distance.abs() / self.speed_mm_per_sec)
                .unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }
}

#[async_trait]
impl Axis for SimulatedAxis {
    fn name(&self) -> &str {
        &self.name
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.borrow())
    }

    async fn set_position(&self, target: f64) -> Result<()> {
        if !target.is_finite() {
            anyhow::bail!("axis {}: target {} is not a finite position", self.name, target);
        }
        if let Some((min, max)) = self.limits {
            if target < min || target > max {
                anyhow::bail!(
                    "axis {}: target {:.3} outside soft limits [{:.3}, {:.3}]",
                    self.name,
                    target,
                    min,
                    max
                );
            }
        }

        let current = *self.position.borrow();
        let delay = self.travel_time(target - current);
        trace!(axis = %self.name, from = current, to = target, ?delay, "moving");

        sleep(delay).await;
        self.position.send_replace(target);

        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<f64> {
        self.position.subscribe()
    }
}
