//! checkup-probe: concrete probe kinds.
//!
//! Each probe is decoded from its JSON config object and implements
//! [`checkup_core::Probe`]:
//!
//! | `type` | Target | Attempt fails when |
//! |---|---|---|
//! | `tcp` | `host:port` | every dial (and TLS handshake, with `tls`) fails, or dial loss exceeds `loss_tolerance` |
//! | `http` | `http://` or `https://` URL | transport error, unexpected status, body assertions |
//! | `exec` | local command | spawn error, non-zero exit, timeout |
//!
//! All of them share `attempts`, `threshold_rtt`, `timeout` and `every`.

pub mod exec;
pub mod http;
pub mod tcp;
mod tls;

pub use exec::ExecProbe;
pub use http::HttpProbe;
pub use tcp::TcpProbe;

use checkup_core::CheckupError;

/// Clamp a configured attempt count to at least one.
pub(crate) fn attempt_count(configured: i64) -> usize {
    usize::try_from(configured).unwrap_or(0).max(1)
}

/// A probe that cannot run with its configuration.
pub(crate) fn misconfigured(kind: &str, title: &str, message: impl Into<String>) -> CheckupError {
    CheckupError::Probe {
        probe: format!("{kind}:{title}"),
        message: message.into(),
    }
}
