//! Plan execution.
//!
//! [`PlanExecutor`] is the black box that physically performs a scan. The worker
//! owns exactly one executor, built inside the worker's own context by an
//! [`ExecutorFactory`] handed to it at spawn time; the controller never touches
//! it.

use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ExecutorConfig;
use crate::hardware::Stage;
use crate::scan::{Plan, ScanRequest};

/// Why a scan did not complete.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The scan window, pitch or dwell cannot be executed.
    #[error("Invalid scan geometry: {0}")]
    InvalidGeometry(String),

    /// An axis move failed.
    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

/// Performs the physical scan for a request.
#[async_trait]
pub trait PlanExecutor: Send {
    async fn execute(&mut self, request: &ScanRequest) -> Result<(), ExecutorError>;
}

/// Builds the worker's executor. Called once, on the worker, before the receive loop.
pub trait ExecutorFactory: Send + 'static {
    fn create(self: Box<Self>) -> Result<Box<dyn PlanExecutor>, ExecutorError>;
}

impl<F> ExecutorFactory for F
where
    F: FnOnce() -> Result<Box<dyn PlanExecutor>, ExecutorError> + Send + 'static,
{
    fn create(self: Box<Self>) -> Result<Box<dyn PlanExecutor>, ExecutorError> {
        (*self)()
    }
}

/// Drives a raster over the stage: move to every grid point (x fastest) and
/// dwell there.
pub struct SimulatedExecutor {
    stage: Stage,
    dwell_scale: f64,
}

impl SimulatedExecutor {
    /// Raster `stage` with the motion and dwell settings in `config`.
    pub fn new(stage: Stage, config: &ExecutorConfig) -> Self {
        Self {
            stage,
            dwell_scale: config.dwell_scale,
        }
    }

    /// Factory that builds a fresh simulated stage inside the worker.
    pub fn factory(config: ExecutorConfig) -> impl ExecutorFactory {
        move || -> Result<Box<dyn PlanExecutor>, ExecutorError> {
            let stage = Stage::simulated(&config);
            Ok(Box::new(SimulatedExecutor::new(stage, &config)))
        }
    }
}

#[async_trait]
impl PlanExecutor for SimulatedExecutor {
    async fn execute(&mut self, request: &ScanRequest) -> Result<(), ExecutorError> {
        let plan = Plan::select(request);
        plan.validate().map_err(ExecutorError::InvalidGeometry)?;

        info!(
            name = request.name(),
            plan = %plan.kind,
            points = plan.point_count(),
            "Executing plan"
        );

        let dwell = Duration::try_from_secs_f64(plan.dwell * self.dwell_scale)
            .map_err(|e| ExecutorError::InvalidGeometry(format!("dwell: {}", e)))?;
        let xs: Vec<f64> = plan.x.positions().collect();
        for y in plan.y.positions() {
            self.stage
                .y
                .set_position(y)
                .await
                .with_context(|| format!("{}: move y to {:.3}", request.name(), y))?;
            for &x in &xs {
                self.stage
                    .x
                    .set_position(x)
                    .await
                    .with_context(|| format!("{}: move x to {:.3}", request.name(), x))?;
                if !dwell.is_zero() {
                    tokio::time::sleep(dwell).await;
                }
            }
        }

        debug!(name = request.name(), "Plan finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedAxis;
    use crate::hardware::Axis;
    use std::sync::Arc;

    fn stage_with_x_limit(max: f64) -> Stage {
        let axis = |name: &str| SimulatedAxis::new(name).with_speed(0.0).with_settle(Duration::ZERO);
        Stage {
            x: Arc::new(axis("x").with_limits(-max, max)),
            y: Arc::new(axis("y")),
            z: Arc::new(axis("z")),
            r: Arc::new(axis("r")),
        }
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            speed_mm_per_sec: 1000.0,
            settle_ms: 0,
            dwell_scale: 0.0,
        }
    }

    #[tokio::test]
    async fn test_raster_ends_at_last_point() {
        let stage = stage_with_x_limit(100.0);
        let mut executor = SimulatedExecutor::new(stage.clone(), &config());
        let request = ScanRequest::builder("s1")
            .x(0.0, 10.0, 3)
            .y(-1.0, 1.0, 2)
            .dwell(0.01)
            .build();

        executor.execute(&request).await.unwrap();
        assert_eq!(stage.x.position().await.unwrap(), 10.0);
        assert_eq!(stage.y.position().await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_device_fault_becomes_error() {
        let mut executor = SimulatedExecutor::new(stage_with_x_limit(5.0), &config());
        let request = ScanRequest::builder("wide").x(0.0, 10.0, 2).build();

        let err = executor.execute(&request).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Device(_)));
        assert!(err.to_string().contains("wide: move x to 10.000"));
    }

    #[tokio::test]
    async fn test_invalid_geometry_rejected_before_motion() {
        let stage = stage_with_x_limit(100.0);
        let mut executor = SimulatedExecutor::new(stage.clone(), &config());
        let request = ScanRequest::builder("flat").x(3.0, 4.0, 0).build();

        let err = executor.execute(&request).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidGeometry(_)));
        assert_eq!(stage.x.position().await.unwrap(), 0.0);
    }
}
