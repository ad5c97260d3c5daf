//! Health check and metrics endpoints.

use axum::{
    extract::State,
    http::{header, StatusCode},
    Json,
};
use std::sync::Arc;

use super::stats::store_stats;
use crate::metrics;
use crate::types::HealthResponse;
use crate::AppState;

/// Health check handler. Reports "degraded" when the store cannot be read.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = store_stats(&state).await;
    let (status, database_accessible, games_in_buffer) = match stats {
        Some(s) => ("ok", true, s.total_games),
        None => ("degraded", false, 0),
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database_accessible,
        games_in_buffer,
    })
}

/// Prometheus metrics handler.
pub async fn metrics_handler() -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics::encode_metrics(),
    )
}
