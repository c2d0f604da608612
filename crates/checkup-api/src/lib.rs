//! checkup-api: HTTP surface of the checkup daemon.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/-/reload` | Reload the configuration, waiting for the old generation to drain |
//! | GET | `/-/healthy` | Liveness |
//! | GET | `<metrics_path>` (default `/metrics`) | Prometheus exposition |
//!
//! With basic auth configured, every route requires it.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use checkup_engine::Controller;
use checkup_metrics::Registry;

pub use auth::{BasicAuth, authorization_header, hash_password};

pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<Controller>,
    pub registry: Arc<Registry>,
}

/// How the router is mounted.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub metrics_path: String,
    pub basic_auth: Option<BasicAuth>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            basic_auth: None,
        }
    }
}

impl ApiConfig {
    /// The metrics path with a leading slash.
    pub fn metrics_path(&self) -> String {
        let trimmed = self.metrics_path.trim();
        if trimmed.is_empty() {
            DEFAULT_METRICS_PATH.to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }
}

/// Build the complete router.
pub fn build_router(state: ApiState, config: &ApiConfig) -> Router {
    let router = Router::new()
        .route("/-/reload", post(handlers::reload))
        .route("/-/healthy", get(handlers::healthy))
        .route(&config.metrics_path(), get(handlers::prometheus_metrics))
        .with_state(state);

    match &config.basic_auth {
        Some(credentials) => router.layer(axum::middleware::from_fn_with_state(
            Arc::new(credentials.clone()),
            auth::basic_auth,
        )),
        None => router,
    }
}
