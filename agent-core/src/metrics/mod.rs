//! Metric types, the process-wide registry, and its snapshot format.

pub mod metric;
pub mod registry;

pub use metric::{Counter, FloatGauge, IntGauge, Metric, MetricValue};
pub use registry::{safe_name, Registry, Snapshot, SnapshotEntry, SinkWorker};
