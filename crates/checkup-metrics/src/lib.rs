//! checkup-metrics: metrics plumbing for the checkup engine.
//!
//! Components never touch a process-wide registry. One [`Registry`] is
//! built per process and handed to everything that publishes metrics as
//! an `Arc<dyn MetricsSink>`.
//!
//! # Architecture
//!
//! ```text
//! Registry (implements MetricsSink)
//!   ├── Family per metric name
//!   │   ├── LabelValueTracker (label tuples + last update)
//!   │   └── series: label values → value
//!   ├── process_retention() → evicts stale series via the trackers
//!   └── render() → text/plain for the /metrics endpoint
//! ```
//!
//! Every series a family exposes is first observed by its tracker, so a
//! retention sweep is enough to bound cardinality when probe targets come
//! and go across reloads.

pub mod error;
pub mod registry;
pub mod sink;
pub mod tracker;

pub use error::{MetricsError, MetricsResult};
pub use registry::Registry;
pub use sink::{Desc, LabelMap, MetricKind, MetricsSink};
pub use tracker::LabelValueTracker;
