//! Learning statistics and learning control.

use axum::{extract::State, http::StatusCode, Json};
use learner::LearningStatus;
use replay_store::StoreStats;
use std::sync::Arc;
use tracing::{info, warn};

use crate::types::{ControlResponse, StatsResponse};
use crate::AppState;

/// Aggregate store counts, read off the async runtime.
pub(crate) async fn store_stats(state: &AppState) -> Option<StoreStats> {
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || store.stats()).await {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read store stats");
            None
        }
        Err(e) => {
            warn!(error = %e, "Store stats task failed");
            None
        }
    }
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    let store = store_stats(&state).await.ok_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;

    let (learning, model_version, serving_steps) = match &state.coordinator {
        Some(c) => (c.status(), c.serving_version(), c.serving_steps()),
        None => (LearningStatus::default(), "untrained".to_string(), 0),
    };
    let stage = state.use_curriculum.then(|| state.curriculum.stage());

    Ok(Json(StatsResponse {
        total_games: store.total_games,
        total_trajectories: store.total_transitions,
        wins: store.outcomes,
        average_moves: store.average_moves,
        learning_active: learning.active,
        learning_paused: learning.paused,
        learning_iterations: learning.iterations,
        current_loss: learning.current_loss,
        model_healthy: learning.model_healthy,
        model_version,
        curriculum: state.use_curriculum.then(|| state.curriculum.stage_info()),
        exploration_rate: state.exploration.epsilon(serving_steps, stage),
        performance: state.evaluator.summary(),
    }))
}

fn learning_disabled() -> (StatusCode, String) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "Learning is not enabled on this server".to_string(),
    )
}

pub async fn pause_learning(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlResponse>, (StatusCode, String)> {
    let coordinator = state.coordinator.as_ref().ok_or_else(learning_disabled)?;
    coordinator.pause();
    info!("Learning paused via API");
    Ok(Json(ControlResponse {
        status: "paused".to_string(),
        learning_paused: coordinator.is_paused(),
    }))
}

pub async fn resume_learning(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlResponse>, (StatusCode, String)> {
    let coordinator = state.coordinator.as_ref().ok_or_else(learning_disabled)?;
    coordinator.resume();
    info!("Learning resumed via API");
    Ok(Json(ControlResponse {
        status: "resumed".to_string(),
        learning_paused: coordinator.is_paused(),
    }))
}
