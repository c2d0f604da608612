//! The metrics sink capability.
//!
//! Components that publish metrics receive an `Arc<dyn MetricsSink>`
//! instead of reaching for a global registry, which keeps tests hermetic.

use std::collections::BTreeMap;

use crate::error::{MetricsError, MetricsResult};

/// Label name → label value.
pub type LabelMap = BTreeMap<String, String>;

/// The exposition type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// Static description of a metric family: name, help text, kind and
/// the fixed, ordered label-name schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Desc {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

impl Desc {
    pub const fn counter(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Counter,
            labels,
        }
    }

    pub const fn gauge(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
            labels,
        }
    }

    /// Pair positional label values with this family's label names.
    pub fn label_map(&self, values: &[&str]) -> MetricsResult<LabelMap> {
        if values.len() != self.labels.len() {
            return Err(MetricsError::LabelCount {
                got: values.len(),
                expected: self.labels.len(),
                names: self.labels.iter().map(|l| l.to_string()).collect(),
            });
        }
        Ok(self
            .labels
            .iter()
            .zip(values)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }
}

/// Accepts labeled counter/gauge updates and series deletions.
pub trait MetricsSink: Send + Sync {
    /// Add `delta` to the counter series identified by `labels`.
    fn add_counter(&self, desc: &Desc, labels: &LabelMap, delta: f64) -> MetricsResult<()>;

    /// Set the gauge series identified by `labels`.
    fn set_gauge(&self, desc: &Desc, labels: &LabelMap, value: f64) -> MetricsResult<()>;

    /// Remove every series matching `labels`. An empty or missing label
    /// value matches any value. Returns whether anything was removed.
    fn delete(&self, name: &str, labels: &LabelMap) -> bool;

    fn inc_counter(&self, desc: &Desc, labels: &LabelMap) -> MetricsResult<()> {
        self.add_counter(desc, labels, 1.0)
    }
}
