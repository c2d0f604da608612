//! checkup-engine: turns a configuration into running checks.
//!
//! # Architecture
//!
//! ```text
//! ConfigSource ──load()──► Checkup { probes, concurrent_checks, storage, notifiers }
//!                              │
//!            ┌─────────────────┴──────────────────┐
//!            ▼                                    ▼
//!   Checkup::check()                      Controller (daemon)
//!   one batch, all probes                   generation N
//!   through one Throttle                      ├── Throttle (shared)
//!            │                                ├── task per probe ── tick ──► Throttle::run
//!            ▼                                └── cancel (watch)              │
//!   notifiers / storage                                                       ▼
//!                                                            Exporter + Probe::collect → MetricsSink
//! ```
//!
//! A reload loads the new configuration first, then cancels the running
//! generation and waits for every one of its tasks to finish before the
//! next generation is spawned.

pub mod checkup;
pub mod config;
pub mod controller;
pub mod exporter;
pub mod notifier;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

pub use checkup::{Checkup, DEFAULT_CONCURRENT_CHECKS};
pub use config::{ConfigSource, FileSource};
pub use controller::{Controller, ResultCallback, DEFAULT_INTERVAL};
pub use exporter::Exporter;
pub use notifier::LogNotifier;
pub use throttle::{Admission, Throttle};
