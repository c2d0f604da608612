//! Label-value retention tracking.
//!
//! Remembers every label-value tuple a metric family has exposed and when
//! it was last updated, so series that stop being reported (a target
//! removed by a reload, say) can be evicted after a retention window.

use std::time::{Duration, Instant};

use crate::error::{MetricsError, MetricsResult};
use crate::sink::LabelMap;

/// The label values of one series, in schema order.
#[derive(Debug)]
struct ObservedValues {
    values: Vec<String>,
    last_update: Instant,
}

/// Tracks the label-value tuples observed for one metric family.
///
/// The label-name schema is fixed at construction. Lookups are a linear
/// scan: cardinality stays small because this tracker is what bounds it.
#[derive(Debug)]
pub struct LabelValueTracker {
    label_names: Vec<String>,
    observed: Vec<ObservedValues>,
}

impl LabelValueTracker {
    pub fn new<I, S>(label_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label_names: label_names.into_iter().map(Into::into).collect(),
            observed: Vec::new(),
        }
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Number of distinct tuples currently tracked.
    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    /// Record an observation now. Returns `true` if the tuple is new.
    pub fn observe(&mut self, labels: &LabelMap) -> MetricsResult<bool> {
        self.observe_at(labels, Instant::now())
    }

    /// Record an observation at `now`.
    ///
    /// Fails without mutating anything if a label is unknown, the arity
    /// does not match the schema, or a value is empty. Empty strings are
    /// reserved as deletion wildcards.
    pub fn observe_at(&mut self, labels: &LabelMap, now: Instant) -> MetricsResult<bool> {
        self.validate(labels)?;
        let values = self.positional(labels);

        if let Some(existing) = self.observed.iter_mut().find(|o| o.values == values) {
            existing.last_update = now;
            return Ok(false);
        }

        self.observed.push(ObservedValues {
            values,
            last_update: now,
        });
        Ok(true)
    }

    /// Evict every tuple not updated within `retention` and return the
    /// evicted tuples as label maps.
    pub fn sweep(&mut self, retention: Duration) -> Vec<LabelMap> {
        self.sweep_at(Instant::now(), retention)
    }

    pub fn sweep_at(&mut self, now: Instant, retention: Duration) -> Vec<LabelMap> {
        let (evicted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.observed)
            .into_iter()
            .partition(|o| now.saturating_duration_since(o.last_update) >= retention);

        self.observed = kept;
        evicted.iter().map(|o| self.to_map(&o.values)).collect()
    }

    /// Forget every tuple matching `pattern`, given in schema order. An
    /// empty pattern value matches any value. Returns how many were removed.
    pub fn remove_matching(&mut self, pattern: &[String]) -> usize {
        let before = self.observed.len();
        self.observed.retain(|o| !matches_pattern(pattern, &o.values));
        before - self.observed.len()
    }

    fn validate(&self, labels: &LabelMap) -> MetricsResult<()> {
        if let Some(unknown) = labels
            .keys()
            .find(|k| !self.label_names.iter().any(|n| n == *k))
        {
            return Err(MetricsError::UnknownLabel(unknown.clone()));
        }
        if labels.len() != self.label_names.len() {
            return Err(MetricsError::LabelCount {
                got: labels.len(),
                expected: self.label_names.len(),
                names: self.label_names.clone(),
            });
        }
        if let Some((name, _)) = labels.iter().find(|(_, v)| v.is_empty()) {
            return Err(MetricsError::EmptyValue(name.clone()));
        }
        Ok(())
    }

    /// Values in schema order. Only called after `validate`.
    fn positional(&self, labels: &LabelMap) -> Vec<String> {
        self.label_names
            .iter()
            .map(|name| labels.get(name).cloned().unwrap_or_default())
            .collect()
    }

    fn to_map(&self, values: &[String]) -> LabelMap {
        self.label_names
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect()
    }
}

/// Whether `values` match `pattern` position by position, treating empty
/// pattern values as wildcards.
pub(crate) fn matches_pattern(pattern: &[String], values: &[String]) -> bool {
    pattern.len() == values.len()
        && pattern
            .iter()
            .zip(values)
            .all(|(p, v)| p.is_empty() || p == v)
}
