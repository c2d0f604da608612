//! Error types for checkup.

use std::fmt;

use thiserror::Error;

/// Result type alias for checkup operations.
pub type CheckupResult<T> = Result<T, CheckupError>;

/// Errors that can occur while loading configuration or running checks.
///
/// A probe reporting an endpoint as down is not an error; it is a normal
/// [`CheckResult`](crate::CheckResult).
#[derive(Debug, Error)]
pub enum CheckupError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown {category} type: {kind}")]
    UnknownKind {
        category: &'static str,
        kind: String,
    },

    #[error("invalid value for concurrent_checks: {0} (must be > 0)")]
    InvalidConcurrency(i64),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("no attempts recorded for {0}")]
    NoAttempts(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("probe {probe} failed: {message}")]
    Probe { probe: String, message: String },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("no storage mechanism defined")]
    NoStorage,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("notifier {kind} failed: {message}")]
    Notify { kind: String, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("controller is not running")]
    NotRunning,

    #[error("controller is already running")]
    AlreadyRunning,
}

impl CheckupError {
    /// Whether this error came from loading or validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            CheckupError::Config(_)
                | CheckupError::UnknownKind { .. }
                | CheckupError::InvalidConcurrency(_)
                | CheckupError::InvalidDuration(_)
                | CheckupError::Json(_)
        )
    }
}

/// Every probe execution failure from one batch, keyed by the probe's
/// position in the declaration order.
#[derive(Debug)]
pub struct AggregateError {
    pub failures: Vec<(usize, CheckupError)>,
}

impl AggregateError {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} check(s) failed to execute", self.failures.len())?;
        for (index, err) in &self.failures {
            write!(f, "; [{index}] {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
