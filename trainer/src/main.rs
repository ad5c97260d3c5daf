//! Trainer - stand-alone online learner for the draughts agent
//!
//! A long-running process that:
//! 1. Opens the experience store the web service records games into
//! 2. Loads the latest checkpoint (or starts a fresh network)
//! 3. Runs actor-critic training iterations on a fixed interval
//! 4. Writes checkpoints the web service hot-reloads
//! 5. Serves /health, /ready and /metrics, and writes a JSON stats snapshot

use anyhow::{Context, Result};
use candle_core::Device;
use clap::Parser;
use learner::approximator::parameter_count;
use learner::{
    AdamParams, CheckpointStore, Coordinator, IterationOutcome, ModelSpec, PerformanceEvaluator,
    TrainingLoop, TrainingSettings,
};
use replay_store::ExperienceStore;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod config;
mod health;
mod metrics;
mod stats;

use crate::config::Config;
use crate::health::HealthState;
use crate::stats::TrainerStats;

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    config.validate()?;

    init_tracing(&config.log_level)?;
    info!(log_level = %config.log_level, "Tracing initialized");

    metrics::init_metrics();
    let central = config.central();

    let store = ExperienceStore::open(&config.db_path, central.replay.max_games)
        .with_context(|| format!("Failed to open experience store at {}", config.db_path))?;
    let store = Arc::new(store);

    let spec = ModelSpec::from_config(&central.model).context("Invalid model configuration")?;
    let checkpoints = CheckpointStore::new(&config.checkpoint_dir);
    let params = AdamParams {
        lr: config.learning_rate,
        ..AdamParams::default()
    };
    let model = checkpoints
        .load_or_fresh(&spec, params, &Device::Cpu)
        .context("Failed to initialise training model")?;

    let coordinator = Coordinator::from_training(
        model.net.as_ref(),
        model.training_steps,
        central.training.loss_window,
        central.training.max_loss_threshold,
    )
    .context("Failed to build coordinator")?;
    let coordinator = Arc::new(coordinator);

    let settings = TrainingSettings::from_config(&central).context("Invalid training configuration")?;
    info!(
        architecture = %spec.architecture,
        parameters = parameter_count(model.net.as_ref()),
        agent = %settings.agent,
        training_steps = model.training_steps,
        batch_size = settings.batch_size,
        interval_secs = config.interval_secs,
        "Starting trainer"
    );

    let health_state = HealthState::new();
    let trainer_stats = Arc::new(TrainerStats::new(&config.stats_path));
    let evaluator = Arc::new(PerformanceEvaluator::new());

    let observer = {
        let coordinator = Arc::clone(&coordinator);
        let evaluator = Arc::clone(&evaluator);
        let store = Arc::clone(&store);
        let health_state = health_state.clone();
        let trainer_stats = Arc::clone(&trainer_stats);
        let last_outcome: Mutex<Option<IterationOutcome>> = Mutex::new(None);
        Arc::new(move |outcome: &IterationOutcome| {
            let status = coordinator.status();
            metrics::record_iteration(outcome, &status);
            health_state.record_iteration();
            trainer_stats.record(outcome);

            let store_stats = match store.stats() {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, "Failed to read store stats");
                    None
                }
            };
            if let Ok(mut last) = last_outcome.lock() {
                *last = Some(outcome.clone());
                trainer_stats.write(&trainer_stats.snapshot(
                    status,
                    last.clone(),
                    evaluator.summary(),
                    store_stats,
                ));
            }
        })
    };

    let training = TrainingLoop::new(settings, Arc::clone(&store), Arc::clone(&coordinator), checkpoints)
        .with_evaluator(evaluator)
        .with_observer(observer);

    if config.health_port != 0 {
        let state = health_state.clone();
        let port = config.health_port;
        // Several missed intervals before liveness fails.
        let progress_timeout = config.interval_secs.saturating_mul(5).max(60);
        tokio::spawn(async move {
            if let Err(e) = health::start_health_server(port, state, progress_timeout).await {
                error!("Health server failed: {:#}", e);
            }
        });
    }
    health_state.set_ready();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_handle = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping trainer...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Failed to listen for ctrl+c: {}", e);
                // Dropping the sender would stop the loop.
                std::future::pending::<()>().await;
            }
        }
    });

    let run_result = training.run(model, shutdown_rx).await;
    shutdown_handle.abort();

    match run_result {
        Ok(()) => {
            info!("Trainer stopped cleanly");
            Ok(())
        }
        Err(e) => {
            health_state.set_unhealthy();
            error!("Trainer failed: {}", e);
            Err(e.into())
        }
    }
}
