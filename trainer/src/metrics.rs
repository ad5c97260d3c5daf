//! Prometheus metrics for the trainer.

use lazy_static::lazy_static;
use learner::{IterationOutcome, LearningStatus};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Iterations by outcome (trained, paused, waiting_for_data)
    pub static ref ITERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("trainer_iterations_total", "Training loop iterations by outcome"),
        &["outcome"]
    ).unwrap();

    pub static ref TRAINING_STEPS: IntGauge = IntGauge::with_opts(
        Opts::new("trainer_training_steps", "Gradient steps applied to the training model")
    ).unwrap();

    pub static ref LOSS: Gauge = Gauge::with_opts(
        Opts::new("trainer_loss", "Total loss of the most recent step")
    ).unwrap();

    pub static ref POLICY_LOSS: Gauge = Gauge::with_opts(
        Opts::new("trainer_policy_loss", "Policy loss of the most recent step")
    ).unwrap();

    pub static ref VALUE_LOSS: Gauge = Gauge::with_opts(
        Opts::new("trainer_value_loss", "Value loss of the most recent step")
    ).unwrap();

    pub static ref GRAD_NORM: Histogram = Histogram::with_opts(
        HistogramOpts::new("trainer_grad_norm", "Global gradient norm before clipping")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0])
    ).unwrap();

    pub static ref SYNCS: IntCounterVec = IntCounterVec::new(
        Opts::new("trainer_syncs_total", "Serving syncs by result"),
        &["result"]
    ).unwrap();

    pub static ref CHECKPOINTS: IntCounter = IntCounter::with_opts(
        Opts::new("trainer_checkpoints_total", "Checkpoints written during training")
    ).unwrap();

    pub static ref KILL_SWITCH_TRIPS: IntCounter = IntCounter::with_opts(
        Opts::new("trainer_kill_switch_trips_total", "Times the loss kill switch paused learning")
    ).unwrap();

    pub static ref LEARNING_PAUSED: IntGauge = IntGauge::with_opts(
        Opts::new("trainer_learning_paused", "Whether learning is paused (0=no, 1=yes)")
    ).unwrap();

    pub static ref AVAILABLE_TRANSITIONS: IntGauge = IntGauge::with_opts(
        Opts::new("trainer_available_transitions", "Agent-side transitions seen while waiting for data")
    ).unwrap();
}

static INIT: Once = Once::new();

/// Register all metrics. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(ITERATIONS.clone())).unwrap();
        REGISTRY.register(Box::new(TRAINING_STEPS.clone())).unwrap();
        REGISTRY.register(Box::new(LOSS.clone())).unwrap();
        REGISTRY.register(Box::new(POLICY_LOSS.clone())).unwrap();
        REGISTRY.register(Box::new(VALUE_LOSS.clone())).unwrap();
        REGISTRY.register(Box::new(GRAD_NORM.clone())).unwrap();
        REGISTRY.register(Box::new(SYNCS.clone())).unwrap();
        REGISTRY.register(Box::new(CHECKPOINTS.clone())).unwrap();
        REGISTRY
            .register(Box::new(KILL_SWITCH_TRIPS.clone()))
            .unwrap();
        REGISTRY.register(Box::new(LEARNING_PAUSED.clone())).unwrap();
        REGISTRY
            .register(Box::new(AVAILABLE_TRANSITIONS.clone()))
            .unwrap();
    });
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_iteration(outcome: &IterationOutcome, status: &LearningStatus) {
    match outcome {
        IterationOutcome::Paused => {
            ITERATIONS.with_label_values(&["paused"]).inc();
        }
        IterationOutcome::WaitingForData { available, .. } => {
            ITERATIONS.with_label_values(&["waiting_for_data"]).inc();
            AVAILABLE_TRANSITIONS.set(*available as i64);
        }
        IterationOutcome::Trained {
            report,
            synced,
            checkpointed,
            kill_switch,
        } => {
            ITERATIONS.with_label_values(&["trained"]).inc();
            TRAINING_STEPS.set(report.training_steps as i64);
            LOSS.set(f64::from(report.loss));
            POLICY_LOSS.set(f64::from(report.policy_loss));
            VALUE_LOSS.set(f64::from(report.value_loss));
            GRAD_NORM.observe(report.grad_norm);
            let result = if *synced { "ok" } else { "rejected" };
            SYNCS.with_label_values(&[result]).inc();
            if *checkpointed {
                CHECKPOINTS.inc();
            }
            if kill_switch.is_some() {
                KILL_SWITCH_TRIPS.inc();
            }
        }
    }
    LEARNING_PAUSED.set(i64::from(status.paused));
}
