//! Dual-model coordinator.
//!
//! The training instance belongs to the training loop; this type owns only
//! the serving slot. The single path from training to serving is
//! [`Coordinator::sync`]: health-check, deep copy into a fresh instance, then
//! swap the `Arc` under the write lock. Readers clone the `Arc` under a read
//! lock, so they hold either the old instance or the new one in full.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use candle_core::{Tensor, D};
use draughts_core::{BOARD_SIZE, NUM_CHANNELS, STATE_SIZE};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::approximator::{deep_copy, Approximator};
use crate::error::Result;

const HEALTH_SEED: u64 = 0x00d1_a6e5;
const POLICY_SUM_TOLERANCE: f32 = 0.01;
const VALUE_BOUND: f32 = 1.1;

/// Outcome of running the fixed synthetic probe through a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub finite: bool,
    pub policy_sum: f32,
    pub value: f32,
}

impl HealthReport {
    pub fn passed(&self) -> bool {
        self.finite
            && (self.policy_sum - 1.0).abs() <= POLICY_SUM_TOLERANCE
            && self.value > -VALUE_BOUND
            && self.value < VALUE_BOUND
    }
}

fn probe_input() -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(HEALTH_SEED);
    (0..STATE_SIZE).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn all_finite(t: &Tensor) -> Result<bool> {
    Ok(t.flatten_all()?
        .to_vec1::<f32>()?
        .iter()
        .all(|v| v.is_finite()))
}

/// Run a seeded `1x5x10x10` input through `model` and measure its outputs.
pub fn health_check(model: &dyn Approximator) -> Result<HealthReport> {
    let input = Tensor::from_vec(
        probe_input(),
        (1, NUM_CHANNELS, BOARD_SIZE, BOARD_SIZE),
        model.device(),
    )?;
    let out = model.forward_batch(&input)?;

    let mut finite = all_finite(&out.logits)? && all_finite(&out.value)?;
    for aux in [&out.material_logits, &out.threat_logits].into_iter().flatten() {
        finite &= all_finite(aux)?;
    }
    let policy = candle_nn::ops::softmax(&out.logits, D::Minus1)?;
    let policy_sum = policy.sum_all()?.to_scalar::<f32>()?;
    let value = out.value.flatten_all()?.get(0)?.to_scalar::<f32>()?;

    Ok(HealthReport {
        finite,
        policy_sum,
        value,
    })
}

/// Learning state reported by stats endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningStatus {
    pub active: bool,
    pub paused: bool,
    pub iterations: u64,
    pub training_steps: u64,
    pub serving_steps: u64,
    pub model_healthy: bool,
    /// Mean total loss over the trailing window.
    pub current_loss: Option<f32>,
    pub policy_loss: Option<f32>,
    pub value_loss: Option<f32>,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub kill_switch_trips: u64,
}

#[derive(Debug, Default)]
struct LossWindow {
    losses: VecDeque<f32>,
    policy_loss: Option<f32>,
    value_loss: Option<f32>,
}

impl LossWindow {
    fn mean(&self) -> Option<f32> {
        if self.losses.is_empty() {
            None
        } else {
            Some(self.losses.iter().sum::<f32>() / self.losses.len() as f32)
        }
    }
}

pub struct Coordinator {
    serving: RwLock<Arc<dyn Approximator>>,
    serving_steps: AtomicU64,
    training_steps: AtomicU64,
    iterations: AtomicU64,
    model_healthy: AtomicBool,
    paused: AtomicBool,
    active: AtomicBool,
    successful_syncs: AtomicU64,
    failed_syncs: AtomicU64,
    kill_switch_trips: AtomicU64,
    loss_window: usize,
    max_loss_threshold: f32,
    losses: Mutex<LossWindow>,
}

impl Coordinator {
    /// Wrap an initial serving instance. `steps` is its training-step count,
    /// used as the version tag.
    pub fn new(
        serving: Arc<dyn Approximator>,
        steps: u64,
        loss_window: usize,
        max_loss_threshold: f64,
    ) -> Self {
        Self {
            serving: RwLock::new(serving),
            serving_steps: AtomicU64::new(steps),
            training_steps: AtomicU64::new(steps),
            iterations: AtomicU64::new(0),
            model_healthy: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            active: AtomicBool::new(false),
            successful_syncs: AtomicU64::new(0),
            failed_syncs: AtomicU64::new(0),
            kill_switch_trips: AtomicU64::new(0),
            loss_window: loss_window.max(1),
            max_loss_threshold: max_loss_threshold as f32,
            losses: Mutex::new(LossWindow::default()),
        }
    }

    /// Serving starts as a deep copy of the training instance.
    pub fn from_training(
        training: &dyn Approximator,
        steps: u64,
        loss_window: usize,
        max_loss_threshold: f64,
    ) -> Result<Self> {
        let serving: Arc<dyn Approximator> = Arc::from(deep_copy(training)?);
        Ok(Self::new(serving, steps, loss_window, max_loss_threshold))
    }

    /// The model answering move requests.
    pub fn serving_model(&self) -> Arc<dyn Approximator> {
        let guard = self.serving.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn serving_steps(&self) -> u64 {
        self.serving_steps.load(Ordering::SeqCst)
    }

    /// Version tag handed to clients, `v{training_steps}`.
    pub fn serving_version(&self) -> String {
        format!("v{}", self.serving_steps())
    }

    pub fn model_healthy(&self) -> bool {
        self.model_healthy.load(Ordering::SeqCst)
    }

    fn swap_serving(&self, model: Arc<dyn Approximator>, steps: u64) {
        let mut guard = self.serving.write().unwrap_or_else(|e| e.into_inner());
        *guard = model;
        self.serving_steps.store(steps, Ordering::SeqCst);
    }

    /// Copy `training` into serving if it passes the health check.
    ///
    /// Returns `false`, leaving serving untouched, when the check fails or
    /// the copy cannot be made.
    pub fn sync(&self, training: &dyn Approximator, steps: u64) -> bool {
        self.training_steps.store(steps, Ordering::SeqCst);
        match health_check(training) {
            Ok(report) if report.passed() => {}
            Ok(report) => {
                self.model_healthy.store(false, Ordering::SeqCst);
                self.failed_syncs.fetch_add(1, Ordering::SeqCst);
                error!(?report, "Training model failed health check, skipping sync");
                return false;
            }
            Err(e) => {
                self.model_healthy.store(false, Ordering::SeqCst);
                self.failed_syncs.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, "Health check errored, skipping sync");
                return false;
            }
        }

        let copy = match deep_copy(training) {
            Ok(copy) => copy,
            Err(e) => {
                self.failed_syncs.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, "Failed to copy training model, skipping sync");
                return false;
            }
        };
        self.swap_serving(Arc::from(copy), steps);
        self.model_healthy.store(true, Ordering::SeqCst);
        self.successful_syncs.fetch_add(1, Ordering::SeqCst);
        debug!(steps, "Synced serving model");
        true
    }

    /// Publish an already-independent instance (e.g. loaded from a
    /// checkpoint) after the same health check `sync` applies.
    pub fn publish_serving(&self, model: Arc<dyn Approximator>, steps: u64) -> bool {
        match health_check(model.as_ref()) {
            Ok(report) if report.passed() => {
                self.swap_serving(model, steps);
                self.training_steps.fetch_max(steps, Ordering::SeqCst);
                self.model_healthy.store(true, Ordering::SeqCst);
                info!(steps, "Published serving model");
                true
            }
            Ok(report) => {
                warn!(?report, "Rejected model that failed health check");
                false
            }
            Err(e) => {
                warn!(error = %e, "Rejected model, health check errored");
                false
            }
        }
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Learning paused");
        }
    }

    /// Resume learning and forget the loss history that tripped the kill
    /// switch.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let mut losses = self.losses.lock().unwrap_or_else(|e| e.into_inner());
        losses.losses.clear();
        info!("Learning resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Push one step's losses. Pauses learning and returns the trailing mean
    /// when that mean exceeds the threshold.
    pub fn record_loss(&self, total: f32, policy: f32, value: f32) -> Option<f32> {
        let mean = {
            let mut window = self.losses.lock().unwrap_or_else(|e| e.into_inner());
            window.losses.push_back(total);
            while window.losses.len() > self.loss_window {
                window.losses.pop_front();
            }
            window.policy_loss = Some(policy);
            window.value_loss = Some(value);
            window.mean()
        }?;
        if mean > self.max_loss_threshold || !mean.is_finite() {
            self.kill_switch_trips.fetch_add(1, Ordering::SeqCst);
            warn!(
                mean_loss = mean,
                threshold = self.max_loss_threshold,
                "Average loss exceeds threshold, pausing learning"
            );
            self.pause();
            return Some(mean);
        }
        None
    }

    pub fn current_loss(&self) -> Option<f32> {
        self.losses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mean()
    }

    pub fn record_iteration(&self, training_steps: u64) {
        self.iterations.fetch_add(1, Ordering::SeqCst);
        self.training_steps.store(training_steps, Ordering::SeqCst);
    }

    pub fn status(&self) -> LearningStatus {
        let losses = self.losses.lock().unwrap_or_else(|e| e.into_inner());
        LearningStatus {
            active: self.is_active(),
            paused: self.is_paused(),
            iterations: self.iterations.load(Ordering::SeqCst),
            training_steps: self.training_steps.load(Ordering::SeqCst),
            serving_steps: self.serving_steps(),
            model_healthy: self.model_healthy(),
            current_loss: losses.mean(),
            policy_loss: losses.policy_loss,
            value_loss: losses.value_loss,
            successful_syncs: self.successful_syncs.load(Ordering::SeqCst),
            failed_syncs: self.failed_syncs.load(Ordering::SeqCst),
            kill_switch_trips: self.kill_switch_trips.load(Ordering::SeqCst),
        }
    }
}
