//! Scan request data model.
//!
//! A [`ScanRequest`] describes one raster over the sample stage: an x/y window,
//! the number of points along each axis, and the dwell time at each point. It is
//! immutable once built; every request carries a [`RequestId`] so status events
//! and progress indicators can refer to it independently of its queue position.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier assigned to a request when it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sample description attached by the plan import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Free-form description.
    pub info: String,
    /// Who the sample belongs to.
    pub owner: String,
    /// Sample serial number.
    pub serial: String,
    /// Sample type (e.g. "thin section", "powder")
    #[serde(rename = "type")]
    pub kind: String,
}

/// Position of a scan inside a multi-region sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// Region name within the sample.
    pub region: String,
    /// Free-form description.
    pub info: String,
    /// 1-based position in the sequence.
    pub seq_num: u32,
    /// Length of the sequence.
    pub seq_total: u32,
}

/// Optional metadata variant carried by a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestMetadata {
    /// A whole-sample scan.
    Sample(SampleMetadata),
    /// One region of a multi-region sequence.
    Scan(ScanMetadata),
}

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    id: RequestId,
    name: String,
    xstart: f64,
    xstop: f64,
    xpitch: u32,
    ystart: f64,
    ystop: f64,
    ypitch: u32,
    dwell: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<RequestMetadata>,
}

impl ScanRequest {
    /// Start building a request with the given name.
    ///
    /// Defaults to a single point at the origin with no dwell.
    pub fn builder(name: impl Into<String>) -> ScanRequestBuilder {
        ScanRequestBuilder {
            name: name.into(),
            x: (0.0, 0.0, 1),
            y: (0.0, 0.0, 1),
            dwell: 0.0,
            metadata: None,
        }
    }

    /// Unique id, assigned at construction.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Operator-visible name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// (start, stop, pitch) along x.
    pub fn x_axis(&self) -> (f64, f64, u32) {
        (self.xstart, self.xstop, self.xpitch)
    }

    /// (start, stop, pitch) along y.
    pub fn y_axis(&self) -> (f64, f64, u32) {
        (self.ystart, self.ystop, self.ypitch)
    }

    /// Dwell time per point, in seconds.
    pub fn dwell(&self) -> f64 {
        self.dwell
    }

    /// Attached sample or sequence metadata.
    pub fn metadata(&self) -> Option<&RequestMetadata> {
        self.metadata.as_ref()
    }
}

/// Builder for [`ScanRequest`].
#[derive(Debug, Clone)]
pub struct ScanRequestBuilder {
    name: String,
    x: (f64, f64, u32),
    y: (f64, f64, u32),
    dwell: f64,
    metadata: Option<RequestMetadata>,
}

impl ScanRequestBuilder {
    /// X window and number of points.
    pub fn x(mut self, start: f64, stop: f64, pitch: u32) -> Self {
        self.x = (start, stop, pitch);
        self
    }

    /// Y window and number of points.
    pub fn y(mut self, start: f64, stop: f64, pitch: u32) -> Self {
        self.y = (start, stop, pitch);
        self
    }

    /// Dwell per point, in seconds.
    pub fn dwell(mut self, seconds: f64) -> Self {
        self.dwell = seconds;
        self
    }

    /// Attach sample metadata.
    pub fn sample(mut self, sample: SampleMetadata) -> Self {
        self.metadata = Some(RequestMetadata::Sample(sample));
        self
    }

    /// Attach sequence metadata.
    pub fn scan(mut self, scan: ScanMetadata) -> Self {
        self.metadata = Some(RequestMetadata::Scan(scan));
        self
    }

    /// Freeze the request and assign its id.
    pub fn build(self) -> ScanRequest {
        ScanRequest {
            id: RequestId::new(),
            name: self.name,
            xstart: self.x.0,
            xstop: self.x.1,
            xpitch: self.x.2,
            ystart: self.y.0,
            ystop: self.y.1,
            ypitch: self.y.2,
            dwell: self.dwell,
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assigns_unique_ids() {
        let a = ScanRequest::builder("a").build();
        let b = ScanRequest::builder("a").build();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.x_axis(), (0.0, 0.0, 1));
    }

    #[test]
    fn test_metadata_wire_shape() {
        let request = ScanRequest::builder("s1")
            .x(0.0, 10.0, 11)
            .y(-5.0, 5.0, 3)
            .dwell(0.01)
            .sample(SampleMetadata {
                info: "garnet".into(),
                owner: "beamline".into(),
                serial: "G-17".into(),
                kind: "thin section".into(),
            })
            .build();

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["name"], "s1");
        assert_eq!(json["xpitch"], 11);
        assert_eq!(json["metadata"]["kind"], "sample");
        assert_eq!(json["metadata"]["type"], "thin section");

        let back: ScanRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_metadata_is_optional_on_the_wire() {
        let json = serde_json::json!({
            "id": RequestId::new(),
            "name": "bare",
            "xstart": 0.0, "xstop": 1.0, "xpitch": 2,
            "ystart": 0.0, "ystop": 1.0, "ypitch": 2,
            "dwell": 0.5
        });
        let request: ScanRequest = serde_json::from_value(json).unwrap();
        assert!(request.metadata().is_none());
        assert_eq!(request.dwell(), 0.5);
    }
}
