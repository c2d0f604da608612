//! TCP connect probe, optionally completing a TLS handshake.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::ClientConfig;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::debug;

use checkup_core::verdict::check_loss;
use checkup_core::{duration, Attempt, BoxFuture, CheckResult, CheckupResult, Probe};
use checkup_metrics::{Desc, MetricsSink};

pub const KIND: &str = "tcp";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

const UP: Desc = Desc::gauge(
    "checkup_tcp_up",
    "Whether the last tcp check found the endpoint up (1) or down (0).",
    &["title", "endpoint"],
);
const LOSS: Desc = Desc::gauge(
    "checkup_tcp_loss_ratio",
    "Fraction of attempts that failed in the last tcp check.",
    &["title", "endpoint"],
);

/// Checks that a TCP endpoint accepts connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpProbe {
    #[serde(rename = "endpoint_name")]
    pub name: String,

    /// `host:port` to dial.
    #[serde(rename = "endpoint_url")]
    pub url: String,

    /// Complete a TLS handshake after connecting.
    #[serde(default, rename = "tls")]
    pub tls_enabled: bool,

    /// Accept any server certificate.
    #[serde(default)]
    pub tls_skip_verify: bool,

    /// PEM file of the CAs trusted instead of the public roots.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_ca_file: String,

    /// Per-dial connect timeout. Defaults to 1s.
    #[serde(with = "duration::text", default)]
    pub timeout: Duration,

    /// Median RTT above this degrades the endpoint. Zero disables.
    #[serde(with = "duration::text", default)]
    pub threshold_rtt: Duration,

    #[serde(default)]
    pub attempts: i64,

    /// Dials per attempt. Defaults to 1.
    #[serde(default)]
    pub count: u32,

    /// Tolerated fraction of failed dials within one attempt.
    #[serde(default, alias = "tolerant_loss")]
    pub loss_tolerance: f64,

    #[serde(with = "duration::text", default)]
    pub every: Duration,
}

impl TcpProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn from_config(config: serde_json::Value) -> CheckupResult<Self> {
        Ok(serde_json::from_value(config)?)
    }

    fn timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    fn tls_config(&self) -> CheckupResult<Option<Arc<ClientConfig>>> {
        if !self.tls_enabled {
            return Ok(None);
        }
        crate::tls::client_config(self.tls_skip_verify, &self.tls_ca_file)
            .map(Some)
            .map_err(|e| crate::misconfigured(KIND, &self.name, e))
    }

    /// Connect, plus the TLS handshake when enabled, within one timeout.
    async fn dial(&self, tls: Option<&Arc<ClientConfig>>) -> Result<Duration, String> {
        let start = Instant::now();
        let connect = async {
            let stream = TcpStream::connect(&self.url)
                .await
                .map_err(|e| e.to_string())?;
            if let Some(config) = tls {
                let host = crate::tls::server_host(&self.url);
                crate::tls::connect(Arc::clone(config), host, stream).await?;
            }
            Ok::<_, String>(())
        };
        match tokio::time::timeout(self.timeout(), connect).await {
            Ok(Ok(())) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!(
                "dial {} timed out after {}",
                self.url,
                duration::format(self.timeout())
            )),
        }
    }

    /// One attempt: `count` dials, RTT is the mean of the successful ones.
    async fn attempt(&self, tls: Option<&Arc<ClientConfig>>) -> Attempt {
        let count = self.count.max(1);
        let start = Instant::now();
        let mut rtts = Vec::with_capacity(count as usize);
        let mut last_error = None;

        for _ in 0..count {
            match self.dial(tls).await {
                Ok(rtt) => rtts.push(rtt),
                Err(e) => {
                    debug!(endpoint = %self.url, error = %e, "tcp dial failed");
                    last_error = Some(e);
                }
            }
        }

        if rtts.is_empty() {
            return Attempt::failed(start.elapsed(), last_error.unwrap_or_default());
        }

        let rtt = rtts.iter().sum::<Duration>() / rtts.len() as u32;
        let loss = (count as usize - rtts.len()) as f64 / f64::from(count);
        match check_loss(KIND, loss, self.loss_tolerance) {
            Some(err) => Attempt::failed(rtt, err),
            None => Attempt::ok(rtt),
        }
    }
}

impl Probe for TcpProbe {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn title(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    fn check(&self) -> BoxFuture<'_, CheckupResult<CheckResult>> {
        Box::pin(async move {
            if self.url.is_empty() {
                return Err(crate::misconfigured(KIND, &self.name, "endpoint_url is required"));
            }

            let tls = self.tls_config()?;

            let n = crate::attempt_count(self.attempts);
            let mut attempts = Vec::with_capacity(n);
            for _ in 0..n {
                attempts.push(self.attempt(tls.as_ref()).await);
            }

            CheckResult::new(KIND, &self.name, &self.url)
                .with_attempts(attempts)
                .conclude(self.threshold_rtt)
        })
    }

    fn interval(&self) -> Duration {
        self.every
    }

    fn collect(&self, result: &CheckResult, sink: &dyn MetricsSink) {
        let up = if result.down { 0.0 } else { 1.0 };
        let published = UP
            .label_map(&[result.title.as_str(), result.endpoint.as_str()])
            .and_then(|labels| {
                sink.set_gauge(&UP, &labels, up)?;
                sink.set_gauge(&LOSS, &labels, result.stats().loss)
            });
        if let Err(e) = published {
            debug!(probe = %self.name, error = %e, "tcp metrics not published");
        }
    }
}
