//! Liveness, readiness and metrics endpoints for the trainer.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::metrics;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Shared between the training loop and the health server.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Set once the store and model are ready.
    ready: Arc<AtomicBool>,
    /// Cleared when the training loop has given up.
    healthy: Arc<AtomicBool>,
    /// Unix seconds of the last finished iteration, whatever its outcome.
    last_iteration_time: Arc<AtomicU64>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            healthy: Arc::new(AtomicBool::new(true)),
            last_iteration_time: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        info!("Trainer marked as ready");
    }

    pub fn set_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
        error!("Trainer marked as unhealthy");
    }

    pub fn record_iteration(&self) {
        self.last_iteration_time.store(now_secs(), Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// True until the first iteration, then whether one finished within
    /// `timeout_secs`.
    pub fn is_making_progress(&self, timeout_secs: u64) -> bool {
        let last = self.last_iteration_time.load(Ordering::SeqCst);
        if last == 0 {
            return true;
        }
        now_secs().saturating_sub(last) < timeout_secs
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct HealthContext {
    state: HealthState,
    progress_timeout_secs: u64,
}

/// `progress_timeout_secs` should comfortably exceed the training interval.
pub fn router(state: HealthState, progress_timeout_secs: u64) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(HealthContext {
            state,
            progress_timeout_secs,
        })
}

pub async fn start_health_server(
    port: u16,
    state: HealthState,
    progress_timeout_secs: u64,
) -> anyhow::Result<()> {
    let app = router(state, progress_timeout_secs);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Health server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(ctx): State<HealthContext>) -> StatusCode {
    if ctx.state.is_healthy() && ctx.state.is_making_progress(ctx.progress_timeout_secs) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn ready_handler(State(ctx): State<HealthContext>) -> StatusCode {
    if ctx.state.is_ready() && ctx.state.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_handler() -> String {
    metrics::encode_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn status_of(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_health_state_initial() {
        let state = HealthState::new();
        assert!(!state.is_ready());
        assert!(state.is_healthy());
        assert!(state.is_making_progress(1));
    }

    #[test]
    fn test_progress_tracking() {
        let state = HealthState::new();
        state.record_iteration();
        assert!(state.is_making_progress(60));
        state.last_iteration_time.store(1, Ordering::SeqCst);
        assert!(!state.is_making_progress(60));
    }

    #[tokio::test]
    async fn test_ready_requires_ready_flag() {
        let state = HealthState::new();
        assert_eq!(
            status_of(router(state.clone(), 300), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        state.set_ready();
        assert_eq!(status_of(router(state.clone(), 300), "/ready").await, StatusCode::OK);
        assert_eq!(status_of(router(state, 300), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unhealthy_fails_liveness() {
        let state = HealthState::new();
        state.set_ready();
        state.set_unhealthy();
        assert_eq!(
            status_of(router(state, 300), "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        metrics::init_metrics();
        let response = router(HealthState::new(), 300)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("trainer_"));
    }
}
