//! checkup-core: shared types for the checkup health-check engine.
//!
//! - [`CheckResult`] / [`Attempt`] / [`Stats`]: what one probe run produced
//! - [`verdict`]: turns attempts into Healthy / Degraded / Down
//! - [`capability`]: the `Probe`, `Storage`, `StorageReader` and
//!   `Notifier` seams the engine is written against
//! - [`duration`]: human duration strings (`"1m30s"`) for config files

pub mod capability;
pub mod duration;
pub mod error;
pub mod types;
pub mod verdict;

pub use capability::{BoxFuture, Notifier, Probe, Storage, StorageReader};
pub use error::{AggregateError, CheckupError, CheckupResult};
pub use types::*;
pub use verdict::Verdict;
