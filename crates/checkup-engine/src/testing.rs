//! Instrumented collaborators for engine tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use checkup_core::{
    Attempt, BoxFuture, CheckResult, CheckupError, CheckupResult, Notifier, Probe, Storage,
};

/// Tracks how many probe executions overlap.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct StubProbe {
    pub title: String,
    pub endpoint: String,
    pub delay: Duration,
    pub fail: bool,
    pub every: Duration,
    pub in_flight: Option<Arc<InFlight>>,
    pub calls: Arc<AtomicUsize>,
    pub started: Arc<AtomicUsize>,
}

impl StubProbe {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            endpoint: format!("stub://{title}"),
            title,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_every(mut self, every: Duration) -> Self {
        self.every = every;
        self
    }

    pub fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    pub fn with_calls(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self
    }

    /// Counts checks as they begin rather than as they finish.
    pub fn with_started(mut self, started: Arc<AtomicUsize>) -> Self {
        self.started = started;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn shared(self) -> Arc<dyn Probe> {
        Arc::new(self)
    }
}

impl Probe for StubProbe {
    fn kind(&self) -> &'static str {
        "stub"
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn check(&self) -> BoxFuture<'_, CheckupResult<CheckResult>> {
        Box::pin(async move {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(in_flight) = &self.in_flight {
                in_flight.enter();
            }
            tokio::time::sleep(self.delay).await;
            if let Some(in_flight) = &self.in_flight {
                in_flight.leave();
            }
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                return Err(CheckupError::Probe {
                    probe: format!("stub:{}", self.title),
                    message: "always fails".to_string(),
                });
            }
            CheckResult::new("stub", &self.title, &self.endpoint)
                .with_attempts(vec![Attempt::ok(self.delay)])
                .conclude(Duration::ZERO)
        })
    }

    fn interval(&self) -> Duration {
        self.every
    }
}

/// Counts deliveries; optionally fails every one.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl Notifier for RecordingNotifier {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn notify(&self, _results: &[CheckResult]) -> CheckupResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CheckupError::Notify {
                kind: "recording".to_string(),
                message: "mailbox full".to_string(),
            });
        }
        Ok(())
    }
}

/// Counts stores and maintenance runs.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    pub stored: AtomicUsize,
    pub maintained: AtomicUsize,
    /// Thread the last store ran on.
    pub thread: Mutex<Option<std::thread::ThreadId>>,
}

impl Storage for RecordingStorage {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn store(&self, _results: &[CheckResult]) -> CheckupResult<()> {
        self.stored.fetch_add(1, Ordering::SeqCst);
        *self.thread.lock().unwrap() = Some(std::thread::current().id());
        Ok(())
    }

    fn maintain(&self) -> CheckupResult<()> {
        self.maintained.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
