//! Per-result counters.

use std::sync::Arc;

use tracing::warn;

use checkup_core::{CheckResult, Verdict};
use checkup_metrics::{Desc, MetricsResult, MetricsSink};

const LABELS: &[&str] = &["type", "title", "endpoint"];

pub const CHECKS_TOTAL: Desc = Desc::counter(
    "checkup_checks_total",
    "Total of checks number by checker",
    LABELS,
);
pub const CHECKS_HEALTHY: Desc = Desc::counter(
    "checkup_checks_healthy",
    "Total of healthy checks number by checker",
    LABELS,
);
pub const CHECKS_DEGRADED: Desc = Desc::counter(
    "checkup_checks_degraded",
    "Total of degraded checks number by checker",
    LABELS,
);
pub const CHECKS_DOWN: Desc = Desc::counter(
    "checkup_checks_down",
    "Total of down checks number by checker",
    LABELS,
);
pub const RTT_MEDIAN: Desc = Desc::gauge(
    "checkup_check_rtt_median_seconds",
    "Median round trip time of the last check",
    LABELS,
);

/// Publishes every completed result to a metrics sink.
#[derive(Clone)]
pub struct Exporter {
    sink: Arc<dyn MetricsSink>,
}

impl Exporter {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &dyn MetricsSink {
        self.sink.as_ref()
    }

    /// Count the result under its verdict. Rejected label sets are logged
    /// and otherwise ignored.
    pub fn record(&self, result: &CheckResult) {
        if let Err(e) = self.try_record(result) {
            warn!(
                probe = %result.title,
                endpoint = %result.endpoint,
                error = %e,
                "result not exported"
            );
        }
    }

    fn try_record(&self, result: &CheckResult) -> MetricsResult<()> {
        let labels = CHECKS_TOTAL.label_map(&[
            result.check_type.as_str(),
            result.title.as_str(),
            result.endpoint.as_str(),
        ])?;

        self.sink.inc_counter(&CHECKS_TOTAL, &labels)?;
        match result.verdict() {
            Some(Verdict::Healthy) => self.sink.inc_counter(&CHECKS_HEALTHY, &labels)?,
            Some(Verdict::Degraded { .. }) => self.sink.inc_counter(&CHECKS_DEGRADED, &labels)?,
            // An unconcluded result counts as down.
            Some(Verdict::Down) | None => self.sink.inc_counter(&CHECKS_DOWN, &labels)?,
        }
        self.sink
            .set_gauge(&RTT_MEDIAN, &labels, result.stats().median.as_secs_f64())
    }
}
