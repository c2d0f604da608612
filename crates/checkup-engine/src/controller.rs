//! Continuous scheduler.
//!
//! The controller owns at most one *generation*: the scheduling tasks
//! spawned from one configuration load, one per probe, all sharing one
//! [`Throttle`] and one cancel channel.
//!
//! ```text
//! start()  : load ─► validate limit ─► spawn generation 1
//! reload() : load ─► cancel gen N ─► await every task of gen N ─► spawn gen N+1
//! stop()   : cancel gen N ─► await every task of gen N
//! ```
//!
//! All three hold the generation lock for their whole duration, so
//! reloads are serialized and two generations never run side by side.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use checkup_core::{CheckResult, CheckupError, CheckupResult, Probe};
use checkup_metrics::MetricsSink;

use crate::checkup::Checkup;
use crate::config::ConfigSource;
use crate::exporter::Exporter;
use crate::throttle::{Admission, Throttle};

/// Interval for probes that declare none, when the controller is given none.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Invoked with every result the controller completes.
pub type ResultCallback = Arc<dyn Fn(&CheckResult) + Send + Sync>;

/// One running configuration.
struct Generation {
    number: u64,
    limit: usize,
    probes: usize,
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Runs every configured probe on its own interval until stopped, and
/// swaps in a freshly loaded configuration on [`reload`](Self::reload).
pub struct Controller {
    source: Arc<dyn ConfigSource>,
    default_interval: Duration,
    sink: Arc<dyn MetricsSink>,
    exporter: Exporter,
    callback: Option<ResultCallback>,
    /// The active generation. Held across start/reload/stop.
    current: Mutex<Option<Generation>>,
    live_tasks: Arc<AtomicUsize>,
    generations: AtomicU64,
}

impl Controller {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        default_interval: Duration,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let default_interval = if default_interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            default_interval
        };
        Self {
            source,
            default_interval,
            exporter: Exporter::new(Arc::clone(&sink)),
            sink,
            callback: None,
            current: Mutex::new(None),
            live_tasks: Arc::new(AtomicUsize::new(0)),
            generations: AtomicU64::new(0),
        }
    }

    /// Set a callback receiving every completed result.
    pub fn with_callback(mut self, callback: ResultCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    /// Load the configuration and start the first generation.
    ///
    /// Any configuration error, including an invalid concurrency limit,
    /// is returned and nothing is started.
    pub async fn start(&self) -> CheckupResult<()> {
        let mut current = self.current.lock().await;
        if current.is_some() {
            return Err(CheckupError::AlreadyRunning);
        }

        let checkup = self.source.load()?;
        let limit = checkup.concurrency_limit()?;
        let generation = self.launch(&checkup, limit);
        info!(
            generation = generation.number,
            probes = generation.probes,
            concurrent_checks = limit,
            "started checkup process in background"
        );
        *current = Some(generation);
        Ok(())
    }

    /// Load a fresh configuration, drain the running generation, then start
    /// the new one.
    ///
    /// A load error leaves the running generation untouched. An invalid
    /// concurrency limit in the new configuration is ignored with a warning
    /// and the previous limit is kept.
    pub async fn reload(&self) -> CheckupResult<()> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            return Err(CheckupError::NotRunning);
        }

        let checkup = match self.source.load() {
            Ok(checkup) => checkup,
            Err(e) => {
                error!(error = %e, "could not reload checkup");
                return Err(e);
            }
        };

        let Some(old) = current.take() else {
            return Err(CheckupError::NotRunning);
        };
        let previous_limit = old.limit;
        let old_number = old.number;
        drain(old).await;
        info!(generation = old_number, "all checker tasks completed, now reloading");

        let limit = match checkup.concurrency_limit() {
            Ok(limit) => limit,
            Err(e) => {
                warn!(error = %e, concurrent_checks = previous_limit, "ignoring invalid concurrent_checks");
                previous_limit
            }
        };

        let generation = self.launch(&checkup, limit);
        info!(
            generation = generation.number,
            probes = generation.probes,
            concurrent_checks = limit,
            "checkup configuration reloaded"
        );
        *current = Some(generation);
        Ok(())
    }

    /// Cancel the running generation and wait for it to drain.
    pub async fn stop(&self) -> CheckupResult<()> {
        let mut current = self.current.lock().await;
        let generation = current.take().ok_or(CheckupError::NotRunning)?;
        let number = generation.number;
        drain(generation).await;
        info!(generation = number, "checkup stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Concurrency limit of the running generation.
    pub async fn concurrency_limit(&self) -> Option<usize> {
        self.current.lock().await.as_ref().map(|g| g.limit)
    }

    /// Scheduling tasks alive right now, across all generations.
    pub fn active_tasks(&self) -> usize {
        self.live_tasks.load(Ordering::SeqCst)
    }

    /// Number of generations started so far.
    pub fn generation(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    fn launch(&self, checkup: &Checkup, limit: usize) -> Generation {
        let number = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel, cancel_rx) = watch::channel(false);
        let throttle = Throttle::new(limit);

        let tasks = checkup
            .probes
            .iter()
            .map(|probe| {
                let declared = probe.interval();
                let task = SchedulingTask {
                    probe: Arc::clone(probe),
                    interval: if declared.is_zero() {
                        self.default_interval
                    } else {
                        declared
                    },
                    throttle: throttle.clone(),
                    sink: Arc::clone(&self.sink),
                    exporter: self.exporter.clone(),
                    callback: self.callback.clone(),
                };
                let live = LiveTask::enter(&self.live_tasks);
                let cancel = cancel_rx.clone();
                tokio::spawn(async move {
                    let _live = live;
                    task.run(cancel).await;
                })
            })
            .collect();

        Generation {
            number,
            limit,
            probes: checkup.probes.len(),
            cancel,
            tasks,
        }
    }
}

/// Broadcast cancel to a generation and wait for every task to finish.
async fn drain(generation: Generation) {
    let _ = generation.cancel.send(true);
    for task in generation.tasks {
        if let Err(e) = task.await {
            error!(generation = generation.number, error = %e, "scheduling task failed");
        }
    }
    debug!(generation = generation.number, "generation drained");
}

/// Counts a scheduling task as live until dropped.
struct LiveTask(Arc<AtomicUsize>);

impl LiveTask {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct SchedulingTask {
    probe: Arc<dyn Probe>,
    interval: Duration,
    throttle: Throttle,
    sink: Arc<dyn MetricsSink>,
    exporter: Exporter,
    callback: Option<ResultCallback>,
}

impl SchedulingTask {
    /// Tick until cancelled.
    ///
    /// A tick first takes a throttle slot, then runs its check in the
    /// background, so the timer only waits while the throttle is saturated.
    /// A cancel that arrives while waiting for a slot drops the tick; checks
    /// that already hold a slot are awaited before returning.
    async fn run(self, mut cancel: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        debug!(probe = %self.probe.title(), interval = ?self.interval, "scheduling task started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.changed() => break,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = ticker.tick() => {
                    let admitted = tokio::select! {
                        biased;
                        _ = cancel.changed() => break,
                        admitted = self.throttle.admit() => admitted,
                    };
                    match admitted {
                        Ok(admission) => {
                            let tick = self.clone();
                            in_flight.spawn(async move { tick.run_once(admission).await });
                        }
                        Err(e) => {
                            error!(probe = %self.probe.title(), error = %e, "throttle closed");
                            break;
                        }
                    }
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        debug!(probe = %self.probe.title(), "scheduling task stopped");
    }

    async fn run_once(&self, admission: Admission) {
        match admission.run(self.probe.as_ref()).await {
            Ok(result) => {
                self.exporter.record(&result);
                self.probe.collect(&result, self.sink.as_ref());
                if let Some(callback) = &self.callback {
                    callback(&result);
                }
            }
            Err(e) => {
                error!(probe = %self.probe.title(), kind = self.probe.kind(), error = %e, "check failed");
            }
        }
    }
}
