//! Metrics error types.

use thiserror::Error;

/// Result type alias for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors raised when a metric update is rejected.
///
/// A rejected update never mutates the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    #[error("label '{0}' is not defined for the metric")]
    UnknownLabel(String),

    #[error("got {got} label(s), but the metric was initialized with {expected} label(s) {names:?}")]
    LabelCount {
        got: usize,
        expected: usize,
        names: Vec<String>,
    },

    #[error("label '{0}' is empty, empty values are not supported")]
    EmptyValue(String),

    #[error("metric '{name}' is registered as a {registered}, not a {requested}")]
    KindMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },
}
