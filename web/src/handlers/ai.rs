//! Move selection and game result handlers.

use axum::{extract::State, http::StatusCode, Json};
use draughts_core::{Board, Color, Outcome};
use learner::{select_move, GameResult, MoveChoice};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::metrics;
use crate::types::{MoveRequest, MoveResponse, ResultRequest, ResultResponse};
use crate::AppState;

fn internal_error() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

/// Choose the agent's move among the client's legal moves.
pub async fn ai_move(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<MoveResponse>, (StatusCode, String)> {
    if req.legal_moves.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "legal_moves must not be empty".to_string(),
        ));
    }

    let me = match req.player.as_deref() {
        Some(label) => label.parse::<Color>().unwrap_or_else(|e| {
            warn!(game_id = %req.game_id, "{}, playing as {}", e, state.agent);
            state.agent
        }),
        None => state.agent,
    };

    let Some(coordinator) = state.coordinator.clone() else {
        metrics::MOVES_SERVED.with_label_values(&["fallback"]).inc();
        return Ok(Json(MoveResponse {
            ai_move: req.legal_moves[0].clone(),
            model_version: "untrained".to_string(),
            confidence: None,
        }));
    };

    let stage = state.use_curriculum.then(|| state.curriculum.stage());
    let epsilon = state.exploration.epsilon(coordinator.serving_steps(), stage);
    let model = coordinator.serving_model();
    let model_version = coordinator.serving_version();
    let board = Board::from_value(&req.board_state);
    let legal_moves = req.legal_moves;

    let started = Instant::now();
    let choice: MoveChoice = tokio::task::spawn_blocking(move || {
        select_move(
            model.as_ref(),
            &board,
            me,
            &legal_moves,
            epsilon,
            &mut rand::thread_rng(),
        )
    })
    .await
    .map_err(|e| {
        error!(error = %e, "Move selection task failed");
        internal_error()
    })?
    .map_err(|e| {
        error!(error = %e, "Move selection failed");
        internal_error()
    })?;
    metrics::MOVE_SECONDS.observe(started.elapsed().as_secs_f64());

    let source = if choice.fallback {
        "fallback"
    } else if choice.explored {
        "explored"
    } else {
        "model"
    };
    metrics::MOVES_SERVED.with_label_values(&[source]).inc();
    debug!(
        game_id = %req.game_id,
        move_number = ?req.move_number,
        ai_move = %choice.notation,
        source,
        epsilon,
        "Selected move"
    );

    Ok(Json(MoveResponse {
        ai_move: choice.notation,
        model_version,
        confidence: choice.confidence,
    }))
}

/// Acknowledge a finished game and store it in the background.
pub async fn ai_result(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResultRequest>,
) -> Json<ResultResponse> {
    let outcome = Outcome::from_label(&req.winner);
    if outcome.as_str() != req.winner {
        warn!(game_id = %req.game_id, winner = %req.winner, "Unknown winner, recording as draw");
    }

    let result = GameResult {
        game_id: req.game_id.clone(),
        outcome,
        trajectory: req.trajectory,
        duration_seconds: req.duration_seconds.unwrap_or(0.0),
        total_moves: req.total_moves.unwrap_or(0),
    };

    let recorder = Arc::clone(&state.recorder);
    tokio::task::spawn_blocking(move || match recorder.record(&result) {
        Ok(summary) => {
            metrics::GAMES_RECORDED
                .with_label_values(&[outcome.as_str()])
                .inc();
            metrics::TRANSITIONS_SKIPPED.inc_by(summary.skipped as u64);
            debug!(
                game_id = %summary.game_id,
                skipped = summary.skipped,
                evicted = summary.evicted,
                "Background recording finished"
            );
        }
        Err(e) => {
            metrics::RECORD_FAILURES.inc();
            error!(game_id = %result.game_id, error = %e, "Failed to record game");
        }
    });

    Json(ResultResponse {
        status: "recorded".to_string(),
        game_id: req.game_id,
    })
}
