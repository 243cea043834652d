//! Scan requests, the operator's queue of them, and how each maps to a plan.

pub mod import;
pub mod plan;
pub mod queue;
pub mod request;

pub use plan::{Plan, PlanKind};
pub use queue::{OrderedQueue, ScanQueue};
pub use request::{RequestId, RequestMetadata, SampleMetadata, ScanMetadata, ScanRequest};
