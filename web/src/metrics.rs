//! Prometheus metrics for the web server component.
//!
//! Covers move serving, game recording and serving-model reloads.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ========== Move Serving ==========

    /// Moves served, by how they were chosen (model, explored, fallback)
    pub static ref MOVES_SERVED: IntCounterVec = IntCounterVec::new(
        Opts::new("web_moves_served_total", "Moves returned by /ai/move"),
        &["source"]
    ).unwrap();

    /// Time spent choosing a move
    pub static ref MOVE_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("web_move_seconds", "Time to select a move")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5])
    ).unwrap();

    // ========== Game Recording ==========

    pub static ref GAMES_RECORDED: IntCounterVec = IntCounterVec::new(
        Opts::new("web_games_recorded_total", "Finished games stored, by winner"),
        &["winner"]
    ).unwrap();

    pub static ref RECORD_FAILURES: IntCounter = IntCounter::with_opts(
        Opts::new("web_record_failures_total", "Games that could not be stored")
    ).unwrap();

    pub static ref TRANSITIONS_SKIPPED: IntCounter = IntCounter::with_opts(
        Opts::new("web_transitions_skipped_total", "Trajectory steps dropped while recording")
    ).unwrap();

    // ========== Serving Model ==========

    pub static ref SERVING_STEPS: IntGauge = IntGauge::with_opts(
        Opts::new("web_serving_training_steps", "Training steps of the serving model")
    ).unwrap();

    pub static ref MODEL_RELOADS: IntCounter = IntCounter::with_opts(
        Opts::new("web_model_reloads_total", "Number of checkpoint hot-reload events")
    ).unwrap();
}

static INIT: Once = Once::new();

/// Initialize and register all metrics with the registry.
/// Safe to call multiple times - only initializes once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(MOVES_SERVED.clone())).unwrap();
        REGISTRY.register(Box::new(MOVE_SECONDS.clone())).unwrap();
        REGISTRY.register(Box::new(GAMES_RECORDED.clone())).unwrap();
        REGISTRY.register(Box::new(RECORD_FAILURES.clone())).unwrap();
        REGISTRY
            .register(Box::new(TRANSITIONS_SKIPPED.clone()))
            .unwrap();
        REGISTRY.register(Box::new(SERVING_STEPS.clone())).unwrap();
        REGISTRY.register(Box::new(MODEL_RELOADS.clone())).unwrap();
    });
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_encode_metrics() {
        init_metrics();
        MOVES_SERVED.with_label_values(&["model"]).inc();
        let output = encode_metrics();
        assert!(output.contains("web_moves_served_total"));
        assert!(output.contains("web_model_reloads_total"));
    }
}
