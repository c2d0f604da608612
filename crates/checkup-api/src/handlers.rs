//! Route handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{error, info};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// POST /-/reload
pub async fn reload(State(state): State<ApiState>) -> impl IntoResponse {
    info!("reload requested");
    match state.controller.reload().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                generation: Some(state.controller.generation()),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse {
                    success: false,
                    generation: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// GET /-/healthy
pub async fn healthy() -> impl IntoResponse {
    (StatusCode::OK, "OK\n")
}

/// GET <metrics_path>
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.registry.render(),
    )
}
