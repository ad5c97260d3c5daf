//! Draughts agent web server
//!
//! HTTP API used by the game client. Endpoints:
//! - GET  /health     - Health check with store reachability
//! - POST /ai/move    - Pick the agent's move among the client's legal moves
//! - POST /ai/result  - Record a finished game (stored in the background)
//! - GET  /ai/stats   - Store totals, learning state, curriculum and performance
//! - POST /ai/pause   - Pause learning
//! - POST /ai/resume  - Resume learning (clears the kill-switch loss window)
//! - GET  /metrics    - Prometheus metrics
//!
//! With `web.embedded_training` the training loop runs in this process and
//! shares the coordinator. Otherwise a separate trainer writes checkpoints
//! and the serving model is hot-reloaded from disk.

use anyhow::{Context, Result};
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use candle_core::Device;
use draughts_core::Color;
use engine_config::{load_config, CentralConfig};
use learner::approximator::parameter_count;
use learner::{
    AdamParams, AdaptiveExploration, CheckpointStore, Coordinator, CurriculumManager,
    ExplorationParams, GameRecorder, ModelSpec, PerformanceEvaluator, TrainingLoop,
    TrainingSettings,
};
use model_watcher::CheckpointWatcher;
use replay_store::ExperienceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

mod handlers;
mod metrics;
mod types;

use handlers::{ai_move, ai_result, get_stats, health, metrics_handler, pause_learning, resume_learning};

/// Shared application state
pub struct AppState {
    pub store: Arc<ExperienceStore>,
    /// Absent when the server only plays fallback moves
    pub coordinator: Option<Arc<Coordinator>>,
    pub exploration: Arc<AdaptiveExploration>,
    pub evaluator: Arc<PerformanceEvaluator>,
    pub curriculum: Arc<CurriculumManager>,
    pub recorder: Arc<GameRecorder>,
    pub agent: Color,
    pub use_curriculum: bool,
}

impl AppState {
    pub fn new(
        store: Arc<ExperienceStore>,
        coordinator: Option<Arc<Coordinator>>,
        agent: Color,
        exploration: ExplorationParams,
        evaluator: Arc<PerformanceEvaluator>,
        use_curriculum: bool,
    ) -> Self {
        let exploration = Arc::new(AdaptiveExploration::new(exploration));
        let curriculum = Arc::new(CurriculumManager::new());
        let recorder = Arc::new(GameRecorder::new(
            Arc::clone(&store),
            agent,
            Arc::clone(&exploration),
            Arc::clone(&evaluator),
            Arc::clone(&curriculum),
        ));
        Self {
            store,
            coordinator,
            exploration,
            evaluator,
            curriculum,
            recorder,
            agent,
            use_curriculum,
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(origins)
}

/// Create the application router with the given state.
/// This is separated out for testing purposes.
pub fn create_app(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ai/move", post(ai_move))
        .route("/ai/result", post(ai_result))
        .route("/ai/stats", get(get_stats))
        .route("/ai/pause", post(pause_learning))
        .route("/ai/resume", post(resume_learning))
        .route("/metrics", get(metrics_handler))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Completes on Ctrl+C. If the handler cannot be installed the server runs
/// until killed.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping server..."),
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Start the training loop in-process. Training-quality metrics land in
/// `evaluator`. Returns the shared coordinator and the loop's task.
fn start_embedded_training(
    config: &CentralConfig,
    spec: &ModelSpec,
    store: &Arc<ExperienceStore>,
    evaluator: Arc<PerformanceEvaluator>,
    shutdown: watch::Receiver<bool>,
) -> Result<(Arc<Coordinator>, JoinHandle<()>)> {
    let checkpoints = CheckpointStore::new(&config.model.checkpoint_dir);
    let params = AdamParams {
        lr: config.training.learning_rate,
        ..AdamParams::default()
    };
    let model = checkpoints
        .load_or_fresh(spec, params, &Device::Cpu)
        .context("Failed to initialise training model")?;
    let coordinator = Arc::new(
        Coordinator::from_training(
            model.net.as_ref(),
            model.training_steps,
            config.training.loss_window,
            config.training.max_loss_threshold,
        )
        .context("Failed to build coordinator")?,
    );
    metrics::SERVING_STEPS.set(model.training_steps as i64);
    info!(
        parameters = parameter_count(model.net.as_ref()),
        training_steps = model.training_steps,
        "Embedded training model ready"
    );

    let settings = TrainingSettings::from_config(config).context("Invalid training configuration")?;
    let training = TrainingLoop::new(settings, Arc::clone(store), Arc::clone(&coordinator), checkpoints)
        .with_evaluator(evaluator);

    let handle = tokio::spawn(async move {
        if let Err(e) = training.run(model, shutdown).await {
            error!("Embedded training stopped: {}", e);
        }
    });
    Ok((coordinator, handle))
}

/// Serve checkpoints written by a separate trainer process.
async fn start_checkpoint_watcher(config: &CentralConfig, spec: ModelSpec) -> Result<Arc<Coordinator>> {
    let initial = learner::build(spec, &Device::Cpu).context("Failed to build serving model")?;
    let coordinator = Arc::new(
        Coordinator::from_training(
            initial.as_ref(),
            0,
            config.training.loss_window,
            config.training.max_loss_threshold,
        )
        .context("Failed to build coordinator")?,
    );

    let watcher = CheckpointWatcher::new(&config.model.checkpoint_dir, spec, Arc::clone(&coordinator))
        .with_poll_interval(Duration::from_secs(config.web.model_poll_secs.max(1)));
    match watcher.try_load_existing() {
        Ok(true) => info!(version = %coordinator.serving_version(), "Loaded existing checkpoint"),
        Ok(false) => info!("No checkpoint yet - serving a freshly initialised model"),
        Err(e) => warn!("Failed to load existing checkpoint: {:#}", e),
    }
    metrics::SERVING_STEPS.set(coordinator.serving_steps() as i64);

    let mut updates = watcher.start_watching().await?;
    tokio::spawn(async move {
        while let Some(steps) = updates.recv().await {
            metrics::MODEL_RELOADS.inc();
            metrics::SERVING_STEPS.set(steps as i64);
            info!(steps, "Serving model updated");
        }
    });
    Ok(coordinator)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config();
    init_tracing(&config.common.log_level);
    metrics::init_metrics();

    let agent: Color = config
        .common
        .agent_color
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("Invalid common.agent_color")?;
    let spec = ModelSpec::from_config(&config.model).context("Invalid model configuration")?;

    let store = ExperienceStore::open(&config.replay.db_path, config.replay.max_games)
        .with_context(|| format!("Failed to open experience store at {}", config.replay.db_path))?;
    let store = Arc::new(store);
    info!(
        db_path = %config.replay.db_path,
        agent = %agent,
        architecture = %spec.architecture,
        embedded_training = config.web.embedded_training,
        "Configuration loaded"
    );

    let evaluator = Arc::new(PerformanceEvaluator::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (coordinator, training_handle) = if config.web.embedded_training {
        let (coordinator, handle) = start_embedded_training(
            &config,
            &spec,
            &store,
            Arc::clone(&evaluator),
            shutdown_rx,
        )?;
        (coordinator, Some(handle))
    } else {
        (start_checkpoint_watcher(&config, spec).await?, None)
    };

    let state = AppState::new(
        Arc::clone(&store),
        Some(coordinator),
        agent,
        ExplorationParams::from(&config.exploration),
        evaluator,
        config.training.use_curriculum,
    );
    match store.stats() {
        Ok(stats) => {
            let stage = state.curriculum.observe(stats.total_games);
            info!(games = stats.total_games, stage = stage.name, "Store opened");
        }
        Err(e) => warn!(error = %e, "Failed to read store stats at startup"),
    }

    let app = create_app(Arc::new(state), &config.web.allowed_origins);

    let addr = format!("{}:{}", config.web.host, config.web.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = training_handle {
        // The loop exits at its next iteration boundary and checkpoints.
        if let Err(e) = handle.await {
            error!("Training task panicked: {}", e);
        }
    }

    info!("Server shut down gracefully");
    Ok(())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ControlResponse, HealthResponse, MoveResponse, ResultResponse};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use draughts_core::{Move, Outcome};
    use http_body_util::BodyExt;
    use learner::{Architecture, ModelSpec};
    use replay_store::{GameRecord, NewTransition};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestServer {
        _dir: TempDir,
        state: Arc<AppState>,
    }

    impl TestServer {
        fn new(with_model: bool) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(ExperienceStore::open(dir.path().join("replay.db"), 100).unwrap());
            let coordinator = with_model.then(|| {
                let spec = ModelSpec {
                    architecture: Architecture::Enhanced,
                    channels: 4,
                    residual_blocks: 1,
                };
                let net = learner::build(spec, &Device::Cpu).unwrap();
                Arc::new(Coordinator::from_training(net.as_ref(), 0, 100, 10.0).unwrap())
            });
            let state = AppState::new(
                store,
                coordinator,
                Color::Black,
                ExplorationParams::default(),
                Arc::new(PerformanceEvaluator::new()),
                true,
            );
            Self {
                _dir: dir,
                state: Arc::new(state),
            }
        }

        fn app(&self) -> Router {
            create_app(Arc::clone(&self.state), &["*".to_string()])
        }

        async fn wait_for_games(&self, n: u64) {
            for _ in 0..100 {
                if self.state.store.stats().unwrap().total_games >= n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            panic!("game was not recorded in time");
        }
    }

    /// Helper to make a GET request and return response body as string
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    /// Helper to make a POST request with JSON body and return response
    async fn post_json(app: Router, uri: &str, json: &Value) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn grid_with_black_man() -> Value {
        let mut grid = vec![vec![Value::Null; 10]; 10];
        grid[6][1] = json!({"color": "black", "king": false});
        json!(grid)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = TestServer::new(true);
        let (status, body) = get(server.app(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let response: HealthResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.status, "ok");
        assert!(response.database_accessible);
        assert_eq!(response.games_in_buffer, 0);
    }

    #[tokio::test]
    async fn test_move_rejects_empty_legal_moves() {
        let server = TestServer::new(true);
        let request = json!({
            "game_id": "g1",
            "board_state": grid_with_black_man(),
            "legal_moves": []
        });
        let (status, _) = post_json(server.app(), "/ai/move", &request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_move_returns_a_legal_move() {
        let server = TestServer::new(true);
        let legal = vec!["6,1->5,0", "6,1->5,2"];
        let request = json!({
            "game_id": "g1",
            "board_state": grid_with_black_man(),
            "legal_moves": legal,
            "player": "black",
            "move_number": 1
        });
        let (status, body) = post_json(server.app(), "/ai/move", &request).await;

        assert_eq!(status, StatusCode::OK);
        let response: MoveResponse = serde_json::from_str(&body).unwrap();
        assert!(legal.contains(&response.ai_move.as_str()));
        assert_eq!(response.model_version, "v0");
    }

    #[tokio::test]
    async fn test_move_accepts_board_as_json_string() {
        let server = TestServer::new(true);
        let request = json!({
            "game_id": "g1",
            "board_state": grid_with_black_man().to_string(),
            "legal_moves": ["6,1->5,0"]
        });
        let (status, body) = post_json(server.app(), "/ai/move", &request).await;

        assert_eq!(status, StatusCode::OK);
        let response: MoveResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.ai_move, "6,1->5,0");
    }

    #[tokio::test]
    async fn test_unreadable_moves_fall_back_to_first() {
        let server = TestServer::new(true);
        let request = json!({
            "game_id": "g1",
            "board_state": "not a board",
            "legal_moves": ["first", "second"]
        });
        let (status, body) = post_json(server.app(), "/ai/move", &request).await;

        assert_eq!(status, StatusCode::OK);
        let response: MoveResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.ai_move, "first");
        assert!(response.confidence.is_none());
    }

    #[tokio::test]
    async fn test_move_without_model_uses_first_legal_move() {
        let server = TestServer::new(false);
        let request = json!({
            "game_id": "g1",
            "board_state": grid_with_black_man(),
            "legal_moves": ["6,1->5,2", "6,1->5,0"]
        });
        let (status, body) = post_json(server.app(), "/ai/move", &request).await;

        assert_eq!(status, StatusCode::OK);
        let response: MoveResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.ai_move, "6,1->5,2");
        assert_eq!(response.model_version, "untrained");
    }

    #[tokio::test]
    async fn test_result_is_recorded_in_background() {
        let server = TestServer::new(true);
        let mut after = grid_with_black_man();
        after[6][1] = Value::Null;
        after[5][0] = json!({"color": "black", "king": false});
        let request = json!({
            "game_id": "g-result",
            "winner": "ai",
            "trajectory": [{
                "board_state": grid_with_black_man(),
                "action": "6,1->5,0",
                "next_state": after,
                "player": "black",
                "reward": 99.0
            }],
            "duration_seconds": 12.5,
            "total_moves": 1
        });
        let (status, body) = post_json(server.app(), "/ai/result", &request).await;

        assert_eq!(status, StatusCode::OK);
        let response: ResultResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.status, "recorded");
        assert_eq!(response.game_id, "g-result");

        server.wait_for_games(1).await;
        let stored = server.state.store.game_trajectory("g-result").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].reward, 1.0);
        assert!(stored[0].done);
    }

    #[tokio::test]
    async fn test_invalid_winner_is_recorded_as_draw() {
        let server = TestServer::new(true);
        let request = json!({"game_id": "g-draw", "winner": "nobody"});
        let (status, _) = post_json(server.app(), "/ai/result", &request).await;
        assert_eq!(status, StatusCode::OK);

        server.wait_for_games(1).await;
        let stats = server.state.store.stats().unwrap();
        assert_eq!(stats.outcomes.get("draw"), Some(&1));
    }

    #[tokio::test]
    async fn test_stats_reports_store_and_learning() {
        let server = TestServer::new(true);
        post_json(server.app(), "/ai/result", &json!({"game_id": "g1", "winner": "human"})).await;
        server.wait_for_games(1).await;

        let (status, body) = get(server.app(), "/ai/stats").await;
        assert_eq!(status, StatusCode::OK);
        let stats: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(stats["total_games"], 1);
        assert_eq!(stats["wins"]["human"], 1);
        assert_eq!(stats["learning_paused"], false);
        assert_eq!(stats["model_healthy"], true);
        assert_eq!(stats["model_version"], "v0");
        assert!(stats["curriculum"]["stage"].is_string());
        let epsilon = stats["exploration_rate"].as_f64().unwrap();
        assert!(epsilon > 0.0 && epsilon <= 1.0);
    }

    #[tokio::test]
    async fn test_embedded_training_reports_training_quality() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CentralConfig::default();
        config.model.checkpoint_dir = dir.path().join("checkpoints").display().to_string();
        config.model.channels = 4;
        config.model.residual_blocks = 1;
        config.training.batch_size = 4;
        config.training.interval_secs = 1;
        let spec = ModelSpec::from_config(&config.model).unwrap();

        let store = Arc::new(ExperienceStore::open(dir.path().join("replay.db"), 100).unwrap());
        let mut after = grid_with_black_man();
        after[6][1] = Value::Null;
        after[5][0] = json!({"color": "black", "king": false});
        let steps: Vec<_> = (0..4)
            .map(|i| NewTransition {
                move_number: i,
                board_state: grid_with_black_man().to_string(),
                action: Move::new(6, 1, 5, 0),
                reward: if i == 3 { 1.0 } else { 0.0 },
                next_state: after.to_string(),
                done: i == 3,
                player: Color::Black,
                priority: 1.0,
                heuristic_score: None,
                heuristic_move: None,
            })
            .collect();
        store
            .add_game(&GameRecord::new("g1", Outcome::AgentWin, Color::Black), &steps)
            .unwrap();

        let evaluator = Arc::new(PerformanceEvaluator::new());
        let (tx, rx) = watch::channel(false);
        let (coordinator, handle) =
            start_embedded_training(&config, &spec, &store, Arc::clone(&evaluator), rx).unwrap();
        tokio::time::timeout(Duration::from_secs(30), async {
            while coordinator.status().iterations == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let state = AppState::new(
            store,
            Some(Arc::clone(&coordinator)),
            Color::Black,
            ExplorationParams::default(),
            evaluator,
            false,
        );
        let app = create_app(Arc::new(state), &["*".to_string()]);
        let (status, body) = get(app, "/ai/stats").await;
        assert_eq!(status, StatusCode::OK);
        let stats: Value = serde_json::from_str(&body).unwrap();
        assert!(stats["performance"]["avg_policy_entropy"].is_number());
        assert!(stats["performance"]["avg_value_error"].is_number());
        assert!(stats["performance"]["training_steps"].as_u64().unwrap() >= 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let server = TestServer::new(true);

        let (status, body) = post_json(server.app(), "/ai/pause", &json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let response: ControlResponse = serde_json::from_str(&body).unwrap();
        assert!(response.learning_paused);

        let (_, body) = get(server.app(), "/ai/stats").await;
        let stats: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(stats["learning_paused"], true);

        let (status, body) = post_json(server.app(), "/ai/resume", &json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let response: ControlResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.status, "resumed");
        assert!(!response.learning_paused);
    }

    #[tokio::test]
    async fn test_pause_without_learning_is_unavailable() {
        let server = TestServer::new(false);
        let (status, _) = post_json(server.app(), "/ai/pause", &json!({})).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        metrics::init_metrics();
        let server = TestServer::new(true);
        let (status, body) = get(server.app(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("web_"));
    }
}
