//! Result model: attempts, check results, and derived statistics.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::duration;
use crate::error::{CheckupError, CheckupResult};
use crate::verdict::{self, Verdict};

/// One probe try.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    #[serde(with = "duration::nanos")]
    pub rtt: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Attempt {
    pub fn ok(rtt: Duration) -> Self {
        Self { rtt, error: None }
    }

    pub fn failed(rtt: Duration, error: impl Into<String>) -> Self {
        Self {
            rtt,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The outcome of one probe execution.
///
/// Built by the executing probe, concluded with a verdict, then handed to
/// storage, notifiers and metrics, which only read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Unix timestamp in nanoseconds.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub check_type: String,
    pub title: String,
    pub endpoint: String,
    #[serde(rename = "times", default)]
    pub attempts: Vec<Attempt>,
    #[serde(rename = "threshold", with = "duration::nanos", default)]
    pub threshold_rtt: Duration,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn new(
        check_type: impl Into<String>,
        title: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp(),
            check_type: check_type.into(),
            title: title.into(),
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<Attempt>) -> Self {
        self.attempts = attempts;
        self
    }

    /// Evaluate the recorded attempts against `threshold_rtt` and set the
    /// verdict flags.
    pub fn conclude(mut self, threshold_rtt: Duration) -> CheckupResult<Self> {
        self.threshold_rtt = threshold_rtt;
        let verdict = verdict::evaluate(&self.attempts, threshold_rtt).ok_or_else(|| {
            CheckupError::NoAttempts(format!("{} ({})", self.title, self.endpoint))
        })?;
        self.apply(verdict);
        Ok(self)
    }

    /// Set exactly one of healthy / degraded / down.
    pub fn apply(&mut self, verdict: Verdict) {
        self.healthy = false;
        self.degraded = false;
        self.down = false;
        match verdict {
            Verdict::Healthy => self.healthy = true,
            Verdict::Degraded { notice } => {
                self.degraded = true;
                self.notice = Some(notice);
            }
            Verdict::Down => self.down = true,
        }
    }

    /// The verdict, once concluded.
    pub fn verdict(&self) -> Option<Verdict> {
        match (self.healthy, self.degraded, self.down) {
            (true, false, false) => Some(Verdict::Healthy),
            (false, true, false) => Some(Verdict::Degraded {
                notice: self.notice.clone().unwrap_or_default(),
            }),
            (false, false, true) => Some(Verdict::Down),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self.verdict() {
            Some(Verdict::Healthy) => "healthy",
            Some(Verdict::Degraded { .. }) => "degraded",
            Some(Verdict::Down) => "down",
            None => "unknown",
        }
    }

    pub fn stats(&self) -> Stats {
        Stats::compute(&self.attempts)
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        write!(
            f,
            "== {}: {} - {} - {} (median {}, min {}, max {})",
            self.check_type,
            self.title,
            self.endpoint,
            self.status(),
            duration::format(stats.median),
            duration::format(stats.min),
            duration::format(stats.max),
        )?;
        if let Some(notice) = &self.notice {
            write!(f, " - {notice}")?;
        }
        if let Some(err) = self.attempts.iter().find_map(|a| a.error.as_deref()) {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}

/// Statistics derived from an attempt sequence. Never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    pub total: Duration,
    pub mean: Duration,
    pub median: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Fraction of attempts that carried an error.
    pub loss: f64,
}

impl Stats {
    pub fn compute(attempts: &[Attempt]) -> Self {
        if attempts.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<Duration> = attempts.iter().map(|a| a.rtt).collect();
        sorted.sort_unstable();

        let total: Duration = sorted.iter().sum();
        let n = sorted.len();
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2
        } else {
            sorted[n / 2]
        };
        let errors = attempts.iter().filter(|a| a.is_error()).count();

        Self {
            total,
            mean: total / n as u32,
            median,
            min: sorted[0],
            max: sorted[n - 1],
            loss: errors as f64 / n as f64,
        }
    }
}

/// Current Unix timestamp in nanoseconds.
pub fn timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
