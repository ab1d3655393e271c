use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    tracing::debug!("Health check passed");
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": state.config.service_name,
            "version": state.config.service_version,
        })),
    )
}

/// Readiness probe: the ledger lock must be obtainable.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let ledger = state.ledger.read().await;
    tracing::debug!(plots = ledger.directory().len(), "Readiness check passed");
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
