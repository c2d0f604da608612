//! Shared admission gate for probe executions.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use checkup_core::{CheckResult, CheckupError, CheckupResult, Probe};

/// Bounds how many probes execute at once.
///
/// Clones share the same permits, so one throttle handed to every task of
/// a generation bounds the generation as a whole.
#[derive(Debug, Clone)]
pub struct Throttle {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl Throttle {
    pub fn new(limit: usize) -> Self {
        let limit = limit.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Wait for a slot. The slot is held until the returned admission is
    /// used or dropped.
    pub async fn admit(&self) -> CheckupResult<Admission> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CheckupError::NotRunning)?;
        Ok(Admission { _permit: permit })
    }

    /// Wait for a slot, run one probe, release the slot.
    pub async fn run(&self, probe: &dyn Probe) -> CheckupResult<CheckResult> {
        self.admit().await?.run(probe).await
    }
}

/// A held throttle slot.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

impl Admission {
    /// Run one probe, then release the slot.
    pub async fn run(self, probe: &dyn Probe) -> CheckupResult<CheckResult> {
        let result = probe.check().await;
        match &result {
            Ok(r) => debug!("{r}"),
            Err(e) => debug!(probe = %probe.title(), kind = probe.kind(), error = %e, "check errored"),
        }
        result
    }
}
