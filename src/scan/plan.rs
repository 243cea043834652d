//! Plan selection.
//!
//! Every request maps to exactly one [`Plan`] through an exhaustive match on its
//! metadata variant. Adding a metadata variant is a compile error here until the
//! new kind of request has a plan.

use crate::scan::request::{RequestMetadata, ScanRequest};
use std::fmt;

/// Which acquisition plan a request runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    /// Bare raster with no sample bookkeeping
    GridScan,
    /// Raster of a catalogued sample
    SampleScan,
    /// One region of a multi-region sequence
    RegionScan,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GridScan => write!(f, "grid_scan"),
            Self::SampleScan => write!(f, "sample_scan"),
            Self::RegionScan => write!(f, "region_scan"),
        }
    }
}

/// Points along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisSpan {
    /// First position.
    pub start: f64,
    /// Last position.
    pub stop: f64,
    /// Number of positions.
    pub points: u32,
}

impl AxisSpan {
    /// Evenly spaced positions from `start` to `stop` inclusive.
    ///
    /// A single point sits at `start`.
    pub fn positions(&self) -> impl Iterator<Item = f64> + '_ {
        let step = if self.points > 1 {
            (self.stop - self.start) / f64::from(self.points - 1)
        } else {
            0.0
        };
        (0..self.points).map(move |i| self.start + step * f64::from(i))
    }
}

/// A request resolved into the concrete plan the executor will drive.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Which plan was selected.
    pub kind: PlanKind,
    /// Fast axis.
    pub x: AxisSpan,
    /// Slow axis.
    pub y: AxisSpan,
    /// Dwell per point, in seconds.
    pub dwell: f64,
    /// Labels recorded with the run (sample serial, region, sequence position).
    pub labels: Vec<(String, String)>,
}

impl Plan {
    /// Select the plan for a request.
    pub fn select(request: &ScanRequest) -> Self {
        let (xstart, xstop, xpitch) = request.x_axis();
        let (ystart, ystop, ypitch) = request.y_axis();

        let (kind, labels) = match request.metadata() {
            None => (PlanKind::GridScan, Vec::new()),
            Some(RequestMetadata::Sample(sample)) => (
                PlanKind::SampleScan,
                vec![
                    ("serial".to_string(), sample.serial.clone()),
                    ("owner".to_string(), sample.owner.clone()),
                    ("type".to_string(), sample.kind.clone()),
                    ("info".to_string(), sample.info.clone()),
                ],
            ),
            Some(RequestMetadata::Scan(scan)) => (
                PlanKind::RegionScan,
                vec![
                    ("region".to_string(), scan.region.clone()),
                    (
                        "sequence".to_string(),
                        format!("{}/{}", scan.seq_num, scan.seq_total),
                    ),
                    ("info".to_string(), scan.info.clone()),
                ],
            ),
        };

        Self {
            kind,
            x: AxisSpan {
                start: xstart,
                stop: xstop,
                points: xpitch,
            },
            y: AxisSpan {
                start: ystart,
                stop: ystop,
                points: ypitch,
            },
            dwell: request.dwell(),
            labels,
        }
    }

    /// Total number of acquisition points.
    pub fn point_count(&self) -> u64 {
        u64::from(self.x.points) * u64::from(self.y.points)
    }

    /// Check the geometry can actually be driven.
    pub fn validate(&self) -> Result<(), String> {
        if self.x.points == 0 || self.y.points == 0 {
            return Err(format!(
                "pitch must be at least 1 point per axis (x={}, y={})",
                self.x.points, self.y.points
            ));
        }
        let finite = [self.x.start, self.x.stop, self.y.start, self.y.stop, self.dwell]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err("scan window and dwell must be finite".to_string());
        }
        if self.dwell < 0.0 {
            return Err(format!("dwell must not be negative (got {})", self.dwell));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::request::{SampleMetadata, ScanMetadata};

    #[test]
    fn test_plan_selection_by_metadata() {
        let bare = ScanRequest::builder("bare").build();
        assert_eq!(Plan::select(&bare).kind, PlanKind::GridScan);

        let sample = ScanRequest::builder("sample")
            .sample(SampleMetadata {
                info: "i".into(),
                owner: "o".into(),
                serial: "S-1".into(),
                kind: "t".into(),
            })
            .build();
        let plan = Plan::select(&sample);
        assert_eq!(plan.kind, PlanKind::SampleScan);
        assert!(plan
            .labels
            .contains(&("serial".to_string(), "S-1".to_string())));

        let region = ScanRequest::builder("region")
            .scan(ScanMetadata {
                region: "rim".into(),
                info: String::new(),
                seq_num: 2,
                seq_total: 5,
            })
            .build();
        let plan = Plan::select(&region);
        assert_eq!(plan.kind, PlanKind::RegionScan);
        assert!(plan
            .labels
            .contains(&("sequence".to_string(), "2/5".to_string())));
    }

    #[test]
    fn test_axis_positions() {
        let span = AxisSpan {
            start: 0.0,
            stop: 10.0,
            points: 3,
        };
        assert_eq!(span.positions().collect::<Vec<_>>(), vec![0.0, 5.0, 10.0]);

        let single = AxisSpan {
            start: 4.0,
            stop: 10.0,
            points: 1,
        };
        assert_eq!(single.positions().collect::<Vec<_>>(), vec![4.0]);
    }

    #[test]
    fn test_zero_pitch_is_invalid() {
        let request = ScanRequest::builder("flat").x(0.0, 1.0, 0).build();
        let plan = Plan::select(&request);
        assert_eq!(plan.point_count(), 0);
        assert!(plan.validate().unwrap_err().contains("pitch"));
    }

    #[test]
    fn test_negative_dwell_is_invalid() {
        let request = ScanRequest::builder("neg").dwell(-1.0).build();
        assert!(Plan::select(&request).validate().is_err());
    }
}
