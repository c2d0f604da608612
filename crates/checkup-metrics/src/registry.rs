//! In-memory metrics registry with Prometheus text exposition.
//!
//! Every family owns a [`LabelValueTracker`]. Updates are observed by the
//! tracker before they touch a series, and `process_retention` deletes the
//! series the trackers evict.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{MetricsError, MetricsResult};
use crate::sink::{Desc, LabelMap, MetricKind, MetricsSink};
use crate::tracker::{LabelValueTracker, matches_pattern};

/// One metric family: description, tracker, and current series values
/// keyed by label values in schema order.
struct Family {
    desc: Desc,
    tracker: LabelValueTracker,
    series: BTreeMap<Vec<String>, f64>,
}

impl Family {
    fn new(desc: Desc) -> Self {
        Self {
            desc,
            tracker: LabelValueTracker::new(desc.labels.iter().copied()),
            series: BTreeMap::new(),
        }
    }

    fn key(&self, labels: &LabelMap) -> Vec<String> {
        self.desc
            .labels
            .iter()
            .map(|name| labels.get(*name).cloned().unwrap_or_default())
            .collect()
    }
}

/// The process-wide metrics sink.
///
/// Build one per process, wrap it in an `Arc`, and pass it to every
/// component that publishes metrics.
pub struct Registry {
    families: Mutex<BTreeMap<&'static str, Family>>,
    /// Series not updated within this window are evicted. Zero disables
    /// eviction.
    retention: Duration,
}

impl Registry {
    pub fn new(retention: Duration) -> Self {
        Self {
            families: Mutex::new(BTreeMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn families(&self) -> MutexGuard<'_, BTreeMap<&'static str, Family>> {
        self.families
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(
        &self,
        desc: &Desc,
        requested: MetricKind,
        labels: &LabelMap,
        apply: impl FnOnce(&mut f64),
    ) -> MetricsResult<()> {
        let mut families = self.families();
        let family = families
            .entry(desc.name)
            .or_insert_with(|| Family::new(*desc));

        if family.desc.kind != requested {
            return Err(MetricsError::KindMismatch {
                name: desc.name.to_string(),
                registered: family.desc.kind.as_str(),
                requested: requested.as_str(),
            });
        }

        family.tracker.observe(labels)?;
        let key = family.key(labels);
        apply(family.series.entry(key).or_insert(0.0));
        Ok(())
    }

    /// Current value of one series, if it exists.
    pub fn value(&self, name: &str, labels: &LabelMap) -> Option<f64> {
        let families = self.families();
        let family = families.get(name)?;
        family.series.get(&family.key(labels)).copied()
    }

    /// Number of live series in a family.
    pub fn series_count(&self, name: &str) -> usize {
        self.families()
            .get(name)
            .map(|f| f.series.len())
            .unwrap_or(0)
    }

    /// Sweep every family's tracker and delete the evicted series.
    ///
    /// Returns the number of series removed.
    pub fn process_retention(&self) -> usize {
        if self.retention.is_zero() {
            return 0;
        }

        let mut removed = 0;
        let mut families = self.families();
        for (name, family) in families.iter_mut() {
            for labels in family.tracker.sweep(self.retention) {
                let key = family.key(&labels);
                if family.series.remove(&key).is_some() {
                    removed += 1;
                    debug!(metric = %name, ?labels, "evicted stale series");
                }
            }
        }
        removed
    }

    /// Render all families in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let families = self.families();
        let mut out = String::new();

        for family in families.values() {
            out.push_str(&format!("# HELP {} {}\n", family.desc.name, family.desc.help));
            out.push_str(&format!(
                "# TYPE {} {}\n",
                family.desc.name,
                family.desc.kind.as_str()
            ));
            for (values, value) in &family.series {
                out.push_str(family.desc.name);
                if !values.is_empty() {
                    let labels: Vec<String> = family
                        .desc
                        .labels
                        .iter()
                        .zip(values)
                        .map(|(name, v)| format!("{name}=\"{}\"", escape_label_value(v)))
                        .collect();
                    out.push('{');
                    out.push_str(&labels.join(","));
                    out.push('}');
                }
                out.push_str(&format!(" {value}\n"));
            }
        }

        out
    }

    /// Run retention sweeps every `interval` until shutdown.
    pub async fn run_retention(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "metrics retention loop started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let removed = self.process_retention();
                    if removed > 0 {
                        debug!(removed, "metrics retention sweep");
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics retention loop shutting down");
                    break;
                }
            }
        }
    }
}

impl MetricsSink for Registry {
    fn add_counter(&self, desc: &Desc, labels: &LabelMap, delta: f64) -> MetricsResult<()> {
        self.update(desc, MetricKind::Counter, labels, |v| *v += delta)
    }

    fn set_gauge(&self, desc: &Desc, labels: &LabelMap, value: f64) -> MetricsResult<()> {
        self.update(desc, MetricKind::Gauge, labels, |v| *v = value)
    }

    fn delete(&self, name: &str, labels: &LabelMap) -> bool {
        let mut families = self.families();
        let Some(family) = families.get_mut(name) else {
            return false;
        };
        let pattern = family.key(labels);
        let before = family.series.len();
        family
            .series
            .retain(|values, _| !matches_pattern(&pattern, values));
        family.tracker.remove_matching(&pattern);
        family.series.len() < before
    }
}

fn escape_label_value(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKS: Desc = Desc::counter(
        "checkup_checks_total",
        "Total of checks number by checker",
        &["type", "title", "endpoint"],
    );
    const UP: Desc = Desc::gauge("checkup_tcp_up", "Whether the endpoint answered.", &["title", "endpoint"]);

    fn labels(values: &[&str]) -> LabelMap {
        CHECKS.label_map(values).unwrap()
    }

    #[test]
    fn counter_increments() {
        let registry = Registry::new(Duration::from_secs(300));
        let l = labels(&["tcp", "test", "127.0.0.1:80"]);

        registry.inc_counter(&CHECKS, &l).unwrap();
        assert_eq!(registry.value(CHECKS.name, &l), Some(1.0));

        registry.inc_counter(&CHECKS, &l).unwrap();
        assert_eq!(registry.value(CHECKS.name, &l), Some(2.0));
        assert_eq!(registry.series_count(CHECKS.name), 1);
    }

    #[test]
    fn gauge_overwrites() {
        let registry = Registry::new(Duration::ZERO);
        let l = UP.label_map(&["web", "10.0.0.1:80"]).unwrap();

        registry.set_gauge(&UP, &l, 1.0).unwrap();
        registry.set_gauge(&UP, &l, 0.0).unwrap();
        assert_eq!(registry.value(UP.name, &l), Some(0.0));
    }

    #[test]
    fn invalid_labels_leave_registry_untouched() {
        let registry = Registry::new(Duration::ZERO);
        let mut bad = labels(&["tcp", "test", "127.0.0.1:80"]);
        bad.insert("endpoint".to_string(), String::new());

        let err = registry.inc_counter(&CHECKS, &bad).unwrap_err();
        assert_eq!(err, MetricsError::EmptyValue("endpoint".to_string()));
        assert_eq!(registry.series_count(CHECKS.name), 0);
    }

    #[test]
    fn kind_mismatch_rejected() {
        let registry = Registry::new(Duration::ZERO);
        let l = labels(&["tcp", "test", "127.0.0.1:80"]);
        registry.inc_counter(&CHECKS, &l).unwrap();

        let as_gauge = Desc::gauge(CHECKS.name, CHECKS.help, CHECKS.labels);
        let err = registry.set_gauge(&as_gauge, &l, 1.0).unwrap_err();
        assert!(matches!(err, MetricsError::KindMismatch { .. }));
    }

    #[test]
    fn retention_evicts_stale_series() {
        let registry = Registry::new(Duration::from_millis(50));
        let old = labels(&["tcp", "old", "10.0.0.1:80"]);
        registry.inc_counter(&CHECKS, &old).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        let fresh = labels(&["tcp", "fresh", "10.0.0.2:80"]);
        registry.inc_counter(&CHECKS, &fresh).unwrap();

        assert_eq!(registry.process_retention(), 1);
        assert_eq!(registry.value(CHECKS.name, &old), None);
        assert_eq!(registry.value(CHECKS.name, &fresh), Some(1.0));
    }

    #[test]
    fn zero_retention_never_evicts() {
        let registry = Registry::new(Duration::ZERO);
        registry
            .inc_counter(&CHECKS, &labels(&["tcp", "a", "x"]))
            .unwrap();
        assert_eq!(registry.process_retention(), 0);
        assert_eq!(registry.series_count(CHECKS.name), 1);
    }

    #[test]
    fn delete_removes_series() {
        let registry = Registry::new(Duration::ZERO);
        let l = labels(&["tcp", "a", "x"]);
        registry.inc_counter(&CHECKS, &l).unwrap();

        assert!(registry.delete(CHECKS.name, &l));
        assert!(!registry.delete(CHECKS.name, &l));
        assert!(!registry.delete("missing", &l));
    }

    #[test]
    fn delete_with_empty_value_matches_any() {
        let registry = Registry::new(Duration::ZERO);
        for (title, endpoint) in [("a", "x"), ("a", "y"), ("b", "x")] {
            registry
                .inc_counter(&CHECKS, &labels(&["tcp", title, endpoint]))
                .unwrap();
        }

        assert!(registry.delete(CHECKS.name, &labels(&["tcp", "a", ""])));
        assert_eq!(registry.series_count(CHECKS.name), 1);
        assert_eq!(registry.value(CHECKS.name, &labels(&["tcp", "b", "x"])), Some(1.0));
    }

    #[test]
    fn delete_forgets_tracked_values() {
        let registry = Registry::new(Duration::from_millis(50));
        let l = labels(&["tcp", "a", "x"]);
        registry.inc_counter(&CHECKS, &l).unwrap();
        assert!(registry.delete(CHECKS.name, &l));

        // Nothing left for retention to evict.
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(registry.process_retention(), 0);

        registry.inc_counter(&CHECKS, &l).unwrap();
        assert_eq!(registry.value(CHECKS.name, &l), Some(1.0));
    }

    #[test]
    fn render_is_prometheus_text() {
        let registry = Registry::new(Duration::ZERO);
        registry
            .inc_counter(&CHECKS, &labels(&["tcp", "web \"main\"", "127.0.0.1:80"]))
            .unwrap();
        registry
            .set_gauge(&UP, &UP.label_map(&["web", "127.0.0.1:80"]).unwrap(), 1.0)
            .unwrap();

        let output = registry.render();
        assert!(output.contains("# HELP checkup_checks_total Total of checks number by checker"));
        assert!(output.contains("# TYPE checkup_checks_total counter"));
        assert!(output.contains(
            "checkup_checks_total{type=\"tcp\",title=\"web \\\"main\\\"\",endpoint=\"127.0.0.1:80\"} 1"
        ));
        assert!(output.contains("# TYPE checkup_tcp_up gauge"));
        assert!(output.contains("checkup_tcp_up{title=\"web\",endpoint=\"127.0.0.1:80\"} 1"));
    }

    #[tokio::test]
    async fn retention_loop_stops_on_shutdown() {
        let registry = std::sync::Arc::new(Registry::new(Duration::from_millis(10)));
        registry
            .inc_counter(&CHECKS, &labels(&["tcp", "a", "x"]))
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let r = registry.clone();
        let handle = tokio::spawn(async move {
            r.run_retention(Duration::from_millis(20), rx).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(registry.series_count(CHECKS.name), 0);
    }
}
