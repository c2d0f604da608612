//! HTTP(S) GET probe.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use checkup_core::{duration, Attempt, BoxFuture, CheckResult, CheckupResult, Probe};
use checkup_metrics::{Desc, MetricsSink};

pub const KIND: &str = "http";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_UP_STATUS: u16 = 200;
const CLIENT: &str = concat!("checkup/", env!("CARGO_PKG_VERSION"));

const UP: Desc = Desc::gauge(
    "checkup_http_up",
    "Whether the last http check found the endpoint up (1) or down (0).",
    &["title", "endpoint"],
);

/// Checks that an HTTP endpoint answers with the expected status and body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpProbe {
    #[serde(rename = "endpoint_name")]
    pub name: String,

    #[serde(rename = "endpoint_url")]
    pub url: String,

    /// Status code that counts as up. Defaults to 200.
    #[serde(default)]
    pub up_status: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub must_contain: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub must_not_contain: String,

    /// Extra request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Whole-request timeout. Defaults to 10s.
    #[serde(with = "duration::text", default)]
    pub timeout: Duration,

    #[serde(with = "duration::text", default)]
    pub threshold_rtt: Duration,

    #[serde(default)]
    pub attempts: i64,

    #[serde(with = "duration::text", default)]
    pub every: Duration,

    /// Accept any server certificate on `https` URLs.
    #[serde(default)]
    pub tls_skip_verify: bool,

    /// PEM file of the CAs trusted instead of the public roots.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_ca_file: String,
}

/// Where an attempt connects and what it asks for.
struct Target {
    tls: bool,
    host: String,
    port: u16,
    authority: String,
    path: String,
}

impl HttpProbe {
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

    fn up_status(&self) -> u16 {
        if self.up_status == 0 {
            DEFAULT_UP_STATUS
        } else {
            self.up_status
        }
    }

    fn target(&self) -> CheckupResult<Target> {
        let invalid = |msg: String| crate::misconfigured(KIND, &self.name, msg);

        let uri: Uri = self
            .url
            .parse()
            .map_err(|e| invalid(format!("invalid endpoint_url {:?}: {e}", self.url)))?;
        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(other) => return Err(invalid(format!("unsupported scheme {other:?}"))),
            None => return Err(invalid(format!("endpoint_url {:?} has no scheme", self.url))),
        };
        let authority = uri
            .authority()
            .ok_or_else(|| invalid(format!("endpoint_url {:?} has no host", self.url)))?;

        Ok(Target {
            tls,
            host: authority.host().to_string(),
            port: authority
                .port_u16()
                .unwrap_or(if tls { 443 } else { 80 }),
            authority: authority.as_str().to_string(),
            path: uri
                .path_and_query()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        })
    }

    fn tls_config(&self, target: &Target) -> CheckupResult<Option<Arc<ClientConfig>>> {
        if !target.tls {
            return Ok(None);
        }
        crate::tls::client_config(self.tls_skip_verify, &self.tls_ca_file)
            .map(Some)
            .map_err(|e| crate::misconfigured(KIND, &self.name, e))
    }

    async fn attempt(&self, target: &Target, tls: Option<&Arc<ClientConfig>>) -> Attempt {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout(), self.request(target, tls)).await;
        let rtt = start.elapsed();
        match outcome {
            Ok(Ok(())) => Attempt::ok(rtt),
            Ok(Err(e)) => {
                debug!(endpoint = %self.url, error = %e, "http attempt failed");
                Attempt::failed(rtt, e)
            }
            Err(_) => Attempt::failed(
                rtt,
                format!("request timed out after {}", duration::format(self.timeout())),
            ),
        }
    }

    async fn request(&self, target: &Target, tls: Option<&Arc<ClientConfig>>) -> Result<(), String> {
        let host = target.host.trim_start_matches('[').trim_end_matches(']');
        let stream = TcpStream::connect((host, target.port))
            .await
            .map_err(|e| e.to_string())?;

        match tls {
            Some(config) => {
                let stream = crate::tls::connect(Arc::clone(config), host, stream).await?;
                self.exchange(target, stream).await
            }
            None => self.exchange(target, stream).await,
        }
    }

    /// Send the GET over an established connection and judge the response.
    async fn exchange<S>(&self, target: &Target, stream: S) -> Result<(), String>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| e.to_string())?;

        // Drive the connection in the background.
        let uri = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(%uri, error = %e, "http connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(target.path.as_str())
            .header(HOST, target.authority.as_str())
            .header(USER_AGENT, CLIENT);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| e.to_string())?;

        let resp = sender.send_request(req).await.map_err(|e| e.to_string())?;
        let status = resp.status();
        if status.as_u16() != self.up_status() {
            return Err(format!(
                "response status {} (expected {})",
                status.as_u16(),
                self.up_status()
            ));
        }

        if self.must_contain.is_empty() && self.must_not_contain.is_empty() {
            return Ok(());
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| e.to_string())?
            .to_bytes();
        let body = String::from_utf8_lossy(&body);
        if !self.must_contain.is_empty() && !body.contains(&self.must_contain) {
            return Err(format!(
                "response does not contain {:?}",
                self.must_contain
            ));
        }
        if !self.must_not_contain.is_empty() && body.contains(&self.must_not_contain) {
            return Err(format!("response contains {:?}", self.must_not_contain));
        }
        Ok(())
    }
}

impl Probe for HttpProbe {
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
            let target = self.target()?;
            let tls = self.tls_config(&target)?;

            let n = crate::attempt_count(self.attempts);
            let mut attempts = Vec::with_capacity(n);
            for _ in 0..n {
                attempts.push(self.attempt(&target, tls.as_ref()).await);
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
            .and_then(|labels| sink.set_gauge(&UP, &labels, up));
        if let Err(e) = published {
            debug!(probe = %self.name, error = %e, "http metrics not published");
        }
    }
}
