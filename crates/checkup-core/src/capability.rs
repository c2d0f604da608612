//! Capabilities the engine is written against.
//!
//! Concrete probes, storage backends and notifiers live in other crates;
//! the engine only ever sees these traits behind `Arc<dyn _>`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use checkup_metrics::MetricsSink;

use crate::error::CheckupResult;
use crate::types::CheckResult;

/// Boxed future returned by object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single configured check against one endpoint.
pub trait Probe: Send + Sync + fmt::Debug {
    /// The config discriminator of this probe kind (`"tcp"`, `"http"`, ...).
    fn kind(&self) -> &'static str;

    fn title(&self) -> &str;

    fn endpoint(&self) -> &str;

    /// Run every attempt and conclude a verdict.
    ///
    /// An `Err` means the check could not be executed at all (bad
    /// configuration, for example). An unreachable endpoint is an `Ok`
    /// result with `down` set.
    fn check(&self) -> BoxFuture<'_, CheckupResult<CheckResult>>;

    /// The probe's own scheduling interval. Zero means "use the default".
    fn interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Publish probe-specific metrics derived from a completed result.
    fn collect(&self, _result: &CheckResult, _sink: &dyn MetricsSink) {}
}

/// Persists batches of results.
pub trait Storage: Send + Sync {
    fn kind(&self) -> &'static str;

    fn store(&self, results: &[CheckResult]) -> CheckupResult<()>;

    /// Retention cleanup of persisted batches, run after every store.
    fn maintain(&self) -> CheckupResult<()> {
        Ok(())
    }

    /// Read access, for backends that support it.
    fn reader(&self) -> Option<&dyn StorageReader> {
        None
    }
}

/// Reads stored batches back.
pub trait StorageReader: Send + Sync {
    /// Results of one stored batch.
    fn fetch(&self, name: &str) -> CheckupResult<Vec<CheckResult>>;

    /// Batch name → Unix timestamp (nanoseconds) it was stored at.
    fn index(&self) -> CheckupResult<BTreeMap<String, i64>>;
}

/// Delivers a completed batch somewhere.
pub trait Notifier: Send + Sync {
    fn kind(&self) -> &'static str;

    fn notify(&self, results: &[CheckResult]) -> CheckupResult<()>;
}
