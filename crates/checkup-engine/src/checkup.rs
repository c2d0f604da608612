//! One-shot batch execution of a probe set.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use checkup_core::{
    AggregateError, CheckResult, CheckupError, CheckupResult, Notifier, Probe, Storage,
};

use crate::throttle::Throttle;

pub const DEFAULT_CONCURRENT_CHECKS: usize = 128;

/// A loaded configuration: what to check, how many at once, and where the
/// results go.
///
/// Never mutated once built; a reload builds a fresh one.
#[derive(Clone, Default)]
pub struct Checkup {
    pub probes: Vec<Arc<dyn Probe>>,
    /// `None` means [`DEFAULT_CONCURRENT_CHECKS`].
    pub concurrent_checks: Option<i64>,
    pub storage: Option<Arc<dyn Storage>>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
}

impl fmt::Debug for Checkup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkup")
            .field("probes", &self.probes)
            .field("concurrent_checks", &self.concurrent_checks)
            .field("storage", &self.storage.as_ref().map(|s| s.kind()))
            .field(
                "notifiers",
                &self.notifiers.iter().map(|n| n.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Checkup {
    pub fn new(probes: Vec<Arc<dyn Probe>>) -> Self {
        Self {
            probes,
            ..Self::default()
        }
    }

    pub fn with_concurrent_checks(mut self, limit: i64) -> Self {
        self.concurrent_checks = Some(limit);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// The validated concurrency limit.
    pub fn concurrency_limit(&self) -> CheckupResult<usize> {
        match self.concurrent_checks {
            None => Ok(DEFAULT_CONCURRENT_CHECKS),
            Some(n) if n > 0 => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
            Some(n) => Err(CheckupError::InvalidConcurrency(n)),
        }
    }

    /// Run every probe once and return results in declaration order.
    ///
    /// If any probe fails to execute, the failures are returned together
    /// and no notifier runs.
    pub async fn check(&self) -> CheckupResult<Vec<CheckResult>> {
        let throttle = Throttle::new(self.concurrency_limit()?);

        let handles: Vec<_> = self
            .probes
            .iter()
            .map(|probe| {
                let probe = Arc::clone(probe);
                let throttle = throttle.clone();
                tokio::spawn(async move { throttle.run(probe.as_ref()).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();
        for (index, (handle, probe)) in handles.into_iter().zip(&self.probes).enumerate() {
            match handle.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => failures.push((index, e)),
                Err(e) => failures.push((
                    index,
                    CheckupError::Probe {
                        probe: format!("{}:{}", probe.kind(), probe.title()),
                        message: format!("check task failed: {e}"),
                    },
                )),
            }
        }

        if !failures.is_empty() {
            return Err(AggregateError { failures }.into());
        }

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&results) {
                error!(notifier = notifier.kind(), error = %e, "sending notifications failed");
            }
        }

        debug!(checks = results.len(), "batch complete");
        Ok(results)
    }

    /// [`check`](Self::check), then store the results and run storage
    /// maintenance.
    pub async fn check_and_store(&self) -> CheckupResult<Vec<CheckResult>> {
        let storage = Arc::clone(self.storage.as_ref().ok_or(CheckupError::NoStorage)?);

        let results = self.check().await?;
        // Storage backends do blocking I/O.
        tokio::task::spawn_blocking(move || {
            storage.store(&results)?;
            storage.maintain()?;
            Ok::<_, CheckupError>(results)
        })
        .await
        .map_err(|e| CheckupError::Storage(format!("storage task failed: {e}")))?
    }
}
