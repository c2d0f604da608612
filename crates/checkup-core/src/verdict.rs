//! Verdict evaluation.
//!
//! ```text
//! any attempt errored             → Down
//! threshold > 0 and median > it   → Degraded (with notice)
//! otherwise                       → Healthy
//! ```
//!
//! Packet-oriented probes run [`check_loss`] per attempt first and record
//! the returned message as that attempt's error.

use std::time::Duration;

use crate::duration;
use crate::types::{Attempt, Stats};

/// Health classification of a concluded result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Degraded { notice: String },
    Down,
}

/// Classify an attempt sequence. Returns `None` for an empty sequence,
/// which callers treat as a configuration error.
pub fn evaluate(attempts: &[Attempt], threshold_rtt: Duration) -> Option<Verdict> {
    if attempts.is_empty() {
        return None;
    }

    if attempts.iter().any(Attempt::is_error) {
        return Some(Verdict::Down);
    }

    if !threshold_rtt.is_zero() {
        let stats = Stats::compute(attempts);
        if stats.median > threshold_rtt {
            return Some(Verdict::Degraded {
                notice: format!(
                    "median round trip time exceeded threshold ({})",
                    duration::format(threshold_rtt)
                ),
            });
        }
    }

    Some(Verdict::Healthy)
}

/// Compare an observed loss ratio against a tolerance.
///
/// Returns the error to record on the attempt when the loss is too high.
pub fn check_loss(kind: &str, loss: f64, tolerance: f64) -> Option<String> {
    (loss > tolerance).then(|| {
        format!("{kind} loss ({loss:.2}) greater than tolerated loss ({tolerance:.2})")
    })
}
