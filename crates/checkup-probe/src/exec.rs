//! Local command probe.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use checkup_core::{duration, Attempt, BoxFuture, CheckResult, CheckupResult, Probe};

pub const KIND: &str = "exec";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a command; the endpoint is up when it exits zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecProbe {
    #[serde(rename = "endpoint_name")]
    pub name: String,

    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,

    /// Per-run timeout; the child is killed when it expires. Defaults to 30s.
    #[serde(with = "duration::text", default)]
    pub timeout: Duration,

    #[serde(with = "duration::text", default)]
    pub threshold_rtt: Duration,

    #[serde(default)]
    pub attempts: i64,

    #[serde(with = "duration::text", default)]
    pub every: Duration,
}

impl ExecProbe {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
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

    async fn attempt(&self) -> Attempt {
        let start = Instant::now();
        let mut command = Command::new(&self.command);
        command
            .args(&self.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = command.output();

        let outcome = match tokio::time::timeout(self.timeout(), output).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if stderr.is_empty() {
                    Err(output.status.to_string())
                } else {
                    Err(stderr)
                }
            }
            Ok(Err(e)) => Err(format!("failed to run {}: {e}", self.command)),
            Err(_) => Err(format!(
                "command timed out after {}",
                duration::format(self.timeout())
            )),
        };

        let rtt = start.elapsed();
        match outcome {
            Ok(()) => Attempt::ok(rtt),
            Err(e) => {
                debug!(command = %self.command, error = %e, "exec attempt failed");
                Attempt::failed(rtt, e)
            }
        }
    }
}

impl Probe for ExecProbe {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn title(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.command
    }

    fn check(&self) -> BoxFuture<'_, CheckupResult<CheckResult>> {
        Box::pin(async move {
            if self.command.is_empty() {
                return Err(crate::misconfigured(KIND, &self.name, "command is required"));
            }

            let n = crate::attempt_count(self.attempts);
            let mut attempts = Vec::with_capacity(n);
            for _ in 0..n {
                attempts.push(self.attempt().await);
            }

            CheckResult::new(KIND, &self.name, &self.command)
                .with_attempts(attempts)
                .conclude(self.threshold_rtt)
        })
    }

    fn interval(&self) -> Duration {
        self.every
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn decodes_config() {
        let probe = ExecProbe::from_config(serde_json::json!({
            "type": "exec",
            "endpoint_name": "disk",
            "command": "/usr/local/bin/check_disk",
            "arguments": ["-w", "80"],
            "timeout": "5s"
        }))
        .unwrap();
        assert_eq!(probe.endpoint(), "/usr/local/bin/check_disk");
        assert_eq!(probe.arguments, vec!["-w", "80"]);
        assert_eq!(probe.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_exit_is_healthy() {
        let mut probe = ExecProbe::new("ok", "true");
        probe.attempts = 2;
        let result = probe.check().await.unwrap();
        assert!(result.healthy, "{result}");
        assert_eq!(result.attempts.len(), 2);
    }

    #[tokio::test]
    async fn stderr_becomes_attempt_error() {
        let probe = ExecProbe::new("fails", "sh").with_arguments(["-c", "echo broken >&2; exit 3"]);
        let result = probe.check().await.unwrap();
        assert!(result.down);
        assert_eq!(result.attempts[0].error.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn silent_failure_reports_exit_status() {
        let probe = ExecProbe::new("fails", "sh").with_arguments(["-c", "exit 1"]);
        let result = probe.check().await.unwrap();
        assert!(result.down);
        let err = result.attempts[0].error.as_deref().unwrap();
        assert!(err.contains('1'), "{err}");
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let mut probe = ExecProbe::new("slow", "sleep").with_arguments(["5"]);
        probe.timeout = Duration::from_millis(100);
        let result = probe.check().await.unwrap();
        assert!(result.down);
        assert!(result.attempts[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_binary_is_down() {
        let probe = ExecProbe::new("missing", "/nonexistent/checkup-test-binary");
        let result = probe.check().await.unwrap();
        assert!(result.down);
    }

    #[tokio::test]
    async fn empty_command_is_probe_error() {
        assert!(ExecProbe::new("blank", "").check().await.is_err());
    }
}
