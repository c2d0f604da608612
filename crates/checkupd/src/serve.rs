//! `serve`: the long-running daemon.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::Args;
use tokio::sync::watch;
use tracing::{error, info};

use checkup_api::{ApiConfig, ApiState, BasicAuth, build_router};
use checkup_engine::{Controller, FileSource};
use checkup_metrics::Registry;

use crate::Outcome;

/// Upper bound between metrics retention sweeps.
const MAX_RETENTION_SWEEP: Duration = Duration::from_secs(60);

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to expose metrics and the reload endpoint on.
    #[arg(long, default_value = "0.0.0.0:9193")]
    pub listen: String,

    /// Path under which to expose metrics.
    #[arg(long, default_value = "/metrics")]
    pub metrics_path: String,

    /// Interval for checkers that do not declare their own `every`.
    #[arg(long, default_value = "30s", value_parser = crate::parse_duration)]
    pub every: Duration,

    /// How long a metric series survives without updates. 0 keeps them forever.
    #[arg(long, default_value = "5m", value_parser = crate::parse_duration)]
    pub metrics_retention: Duration,

    /// Require HTTP basic authentication on every route.
    #[arg(long)]
    pub basic_auth: bool,

    #[arg(long, default_value = "")]
    pub username: String,

    /// Argon2 PHC hash of the password, as printed by `checkupd hash-password`.
    #[arg(long, alias = "password", default_value = "")]
    pub password_hash: String,
}

impl ServeArgs {
    /// `:9193` listens on every interface.
    fn listen_addr(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }

    fn api_config(&self) -> anyhow::Result<ApiConfig> {
        let basic_auth = if self.basic_auth {
            if self.username.is_empty() || self.password_hash.is_empty() {
                bail!("--basic-auth requires --username and --password-hash");
            }
            let credentials = BasicAuth::new(&self.username, &self.password_hash)
                .map_err(|e| anyhow!("--password-hash is not an argon2 PHC string: {e}"))?;
            Some(credentials)
        } else {
            None
        };
        Ok(ApiConfig {
            metrics_path: self.metrics_path.clone(),
            basic_auth,
        })
    }
}

/// Sweep often enough that no series outlives its retention by much.
fn retention_sweep_interval(retention: Duration) -> Duration {
    retention.min(MAX_RETENTION_SWEEP)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// `checkupd serve`
pub async fn run(config: &Path, args: ServeArgs) -> anyhow::Result<Outcome> {
    info!(config = %config.display(), "checkup daemon starting");
    let api_config = args.api_config()?;

    let registry = Arc::new(Registry::new(args.metrics_retention));
    let controller = Arc::new(Controller::new(
        Arc::new(FileSource::new(config)),
        args.every,
        registry.clone(),
    ));
    controller
        .start()
        .await
        .with_context(|| format!("starting checks from {}", config.display()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retention_handle = if args.metrics_retention.is_zero() {
        None
    } else {
        let registry = registry.clone();
        let every = retention_sweep_interval(args.metrics_retention);
        Some(tokio::spawn(async move {
            registry.run_retention(every, shutdown_rx).await;
        }))
    };

    let router = build_router(
        ApiState {
            controller: controller.clone(),
            registry,
        },
        &api_config,
    );

    let addr = args.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        %addr,
        metrics_path = %api_config.metrics_path(),
        basic_auth = api_config.basic_auth.is_some(),
        "API server listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = retention_handle {
        let _ = handle.await;
    }
    controller.stop().await?;

    info!("checkup daemon stopped");
    Ok(Outcome::Healthy)
}
