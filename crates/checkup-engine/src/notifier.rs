//! The `log` notifier.

use serde::Deserialize;
use tracing::{info, warn};

use checkup_core::{CheckResult, CheckupResult, Notifier};

pub const KIND: &str = "log";

/// Reports results through `tracing`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogNotifier {
    /// Report healthy results too.
    #[serde(default)]
    pub all: bool,
}

impl LogNotifier {
    pub fn from_config(config: serde_json::Value) -> CheckupResult<Self> {
        Ok(serde_json::from_value(config)?)
    }

    /// Results this notifier reports for a batch.
    pub fn selected<'a>(&self, results: &'a [CheckResult]) -> Vec<&'a CheckResult> {
        results
            .iter()
            .filter(|r| self.all || !r.healthy)
            .collect()
    }
}

impl Notifier for LogNotifier {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn notify(&self, results: &[CheckResult]) -> CheckupResult<()> {
        for result in self.selected(results) {
            if result.down {
                warn!(
                    kind = %result.check_type,
                    probe = %result.title,
                    endpoint = %result.endpoint,
                    status = result.status(),
                    "{result}"
                );
            } else {
                info!(
                    kind = %result.check_type,
                    probe = %result.title,
                    endpoint = %result.endpoint,
                    status = result.status(),
                    "{result}"
                );
            }
        }
        Ok(())
    }
}
