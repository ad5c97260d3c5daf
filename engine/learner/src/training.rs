//! Online actor-critic training over the experience store.
//!
//! [`train_step`] is one synchronous gradient step. [`TrainingLoop`] drives
//! it on a timer, publishes through the [`Coordinator`] and owns the
//! checkpoint cadence. The training instance lives in a [`TrainingSession`]
//! whose `Drop` writes a final checkpoint, so every exit path persists state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use candle_core::{Tensor, D};
use candle_nn::ops::{log_softmax, softmax};
use draughts_core::{encode_state, threat_map, Board, Color, BOARD_SIZE, NUM_CHANNELS};
use engine_config::CentralConfig;
use replay_store::{ExperienceStore, StoredTransition};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointStore, TrainingModel};
use crate::coordinator::Coordinator;
use crate::error::{LearnerError, Result};
use crate::evaluator::PerformanceEvaluator;
use crate::optimizer::clip_grad_norm;

const ADVANTAGE_EPS: f32 = 1e-8;
/// Added to |advantage| so no replayed transition drops to zero priority.
const PRIORITY_EPS: f32 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSettings {
    pub agent: Color,
    pub batch_size: usize,
    pub gamma: f32,
    pub value_loss_coef: f64,
    pub entropy_coef: f64,
    pub aux_loss_coef: f64,
    pub max_grad_norm: f64,
    pub interval: Duration,
    pub save_interval: u64,
    pub max_consecutive_errors: u32,
    pub prioritized_replay: bool,
    pub priority_temperature: f64,
    pub recent_ratio: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            agent: Color::Black,
            batch_size: 32,
            gamma: 0.99,
            value_loss_coef: 0.5,
            entropy_coef: 0.01,
            aux_loss_coef: 0.1,
            max_grad_norm: 0.5,
            interval: Duration::from_secs(60),
            save_interval: 10,
            max_consecutive_errors: 5,
            prioritized_replay: true,
            priority_temperature: 0.8,
            recent_ratio: 0.8,
        }
    }
}

impl TrainingSettings {
    pub fn from_config(config: &CentralConfig) -> Result<Self> {
        let agent = config
            .common
            .agent_color
            .parse::<Color>()
            .map_err(LearnerError::Config)?;
        let t = &config.training;
        if t.batch_size == 0 {
            return Err(LearnerError::Config("training.batch_size must be > 0".into()));
        }
        Ok(Self {
            agent,
            batch_size: t.batch_size,
            gamma: t.gamma as f32,
            value_loss_coef: t.value_loss_coef,
            entropy_coef: t.entropy_coef,
            aux_loss_coef: t.aux_loss_coef,
            max_grad_norm: t.max_grad_norm,
            interval: Duration::from_secs(t.interval_secs),
            save_interval: t.save_interval.max(1),
            max_consecutive_errors: t.max_consecutive_errors.max(1),
            prioritized_replay: t.prioritized_replay,
            priority_temperature: t.priority_temperature,
            recent_ratio: t.recent_ratio,
        })
    }
}

/// Material-balance class for the auxiliary head: 0 behind, 1 level, 2 ahead
/// (by more than one piece).
pub fn material_class(board: &Board, me: Color) -> u32 {
    let own = board.count(me);
    let opp = board.count(me.opponent());
    if own + 1 < opp {
        0
    } else if own > opp + 1 {
        2
    } else {
        1
    }
}

/// Transitions flattened into the layouts the network consumes.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    pub ids: Vec<i64>,
    pub states: Vec<f32>,
    pub next_states: Vec<f32>,
    pub actions: Vec<u32>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub material: Vec<u32>,
    pub threats: Vec<f32>,
}

impl PreparedBatch {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Encode boards and actions from `me`'s side. Rows whose action does not
/// map into the action space are dropped.
pub fn prepare_batch(transitions: &[StoredTransition], me: Color) -> PreparedBatch {
    let mut batch = PreparedBatch::default();
    for t in transitions {
        let action = match t.action.encode() {
            Ok(index) => index as u32,
            Err(e) => {
                debug!(id = t.id, error = %e, "Dropping transition with unencodable action");
                continue;
            }
        };
        let before = Board::from_json_str(&t.board_state);
        let after = Board::from_json_str(&t.next_state);

        batch.ids.push(t.id);
        batch.states.extend(encode_state(&before, me));
        batch.next_states.extend(encode_state(&after, me));
        batch.actions.push(action);
        batch.rewards.push(t.reward);
        batch.dones.push(t.done);
        batch.material.push(material_class(&before, me));
        batch.threats.extend(threat_map(&before, me));
    }
    batch
}

/// One-step TD targets: `r` when terminal, else `r + gamma * V(s')`.
pub fn compute_returns(rewards: &[f32], dones: &[bool], next_values: &[f32], gamma: f32) -> Vec<f32> {
    rewards
        .iter()
        .zip(dones)
        .zip(next_values)
        .map(|((r, done), v)| if *done { *r } else { r + gamma * v })
        .collect()
}

/// `(a - mean) / (std + 1e-8)` with the population standard deviation.
pub fn normalize_advantages(advantages: &[f32]) -> Vec<f32> {
    if advantages.is_empty() {
        return Vec::new();
    }
    let n = advantages.len() as f32;
    let mean = advantages.iter().sum::<f32>() / n;
    let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt();
    advantages
        .iter()
        .map(|a| (a - mean) / (std + ADVANTAGE_EPS))
        .collect()
}

/// Mean of `relu(x) - x*t + ln(1 + e^-|x|)`.
fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let relu = logits.relu()?;
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    relu.sub(&logits.mul(targets)?)?.add(&softplus)?.mean_all()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub loss: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub aux_loss: Option<f32>,
    pub grad_norm: f64,
    /// Mean |V(s) - return|.
    pub value_error: f32,
    /// Fraction of rows where the normalised advantage and the return agree
    /// in sign.
    pub advantage_accuracy: f32,
    pub batch_size: usize,
    pub training_steps: u64,
}

/// One actor-critic gradient step on `batch`.
///
/// Returns the report plus `(transition id, new priority)` pairs.
pub fn train_step(
    model: &mut TrainingModel,
    batch: &PreparedBatch,
    settings: &TrainingSettings,
) -> Result<(StepReport, Vec<(i64, f32)>)> {
    let b = batch.len();
    if b == 0 {
        return Err(LearnerError::EmptyBatch);
    }
    let device = model.net.device().clone();
    let shape = (b, NUM_CHANNELS, BOARD_SIZE, BOARD_SIZE);
    let states = Tensor::from_slice(&batch.states, shape, &device)?;
    let next_states = Tensor::from_slice(&batch.next_states, shape, &device)?;

    let out = model.net.forward_batch(&states)?;
    let next_values = model
        .net
        .forward_batch(&next_states)?
        .value
        .detach()
        .to_vec1::<f32>()?;
    let values = out.value.detach().to_vec1::<f32>()?;

    let returns = compute_returns(&batch.rewards, &batch.dones, &next_values, settings.gamma);
    let raw_advantages: Vec<f32> = returns.iter().zip(&values).map(|(r, v)| r - v).collect();
    let advantages = normalize_advantages(&raw_advantages);

    let actions = Tensor::from_slice(&batch.actions, (b, 1), &device)?;
    let advantages_t = Tensor::from_slice(&advantages, b, &device)?;
    let returns_t = Tensor::from_slice(&returns, b, &device)?;

    let log_probs = log_softmax(&out.logits, D::Minus1)?;
    let taken = log_probs.gather(&actions, 1)?.squeeze(1)?;
    let policy_loss = taken.mul(&advantages_t)?.mean_all()?.neg()?;
    let value_loss = out.value.sub(&returns_t)?.sqr()?.mean_all()?;
    let probs = softmax(&out.logits, D::Minus1)?;
    let entropy = probs.mul(&log_probs)?.sum(D::Minus1)?.mean_all()?.neg()?;

    let mut loss = policy_loss
        .add(&value_loss.affine(settings.value_loss_coef, 0.0)?)?
        .sub(&entropy.affine(settings.entropy_coef, 0.0)?)?;

    let aux_loss = match (&out.material_logits, &out.threat_logits) {
        (Some(material_logits), Some(threat_logits)) => {
            let material_targets = Tensor::from_slice(&batch.material, b, &device)?;
            let threat_targets =
                Tensor::from_slice(&batch.threats, (b, BOARD_SIZE, BOARD_SIZE), &device)?;
            let material_loss = candle_nn::loss::cross_entropy(material_logits, &material_targets)?;
            let threat_loss = bce_with_logits(threat_logits, &threat_targets)?;
            let aux = material_loss.add(&threat_loss)?;
            loss = loss.add(&aux.affine(settings.aux_loss_coef, 0.0)?)?;
            Some(aux.to_scalar::<f32>()?)
        }
        _ => None,
    };

    let loss_value = loss.to_scalar::<f32>()?;
    if !loss_value.is_finite() {
        return Err(LearnerError::NonFiniteLoss(loss_value));
    }

    let mut grads = loss.backward()?;
    let vars = model.optimizer.vars();
    let grad_norm = clip_grad_norm(&mut grads, &vars, settings.max_grad_norm)?;
    model.optimizer.step(&grads)?;

    let policy_loss = policy_loss.to_scalar::<f32>()?;
    let value_loss = value_loss.to_scalar::<f32>()?;
    model.training_steps += 1;
    model.policy_loss = Some(policy_loss);
    model.value_loss = Some(value_loss);

    let value_error = values
        .iter()
        .zip(&returns)
        .map(|(v, r)| (v - r).abs())
        .sum::<f32>()
        / b as f32;
    let agreeing = advantages
        .iter()
        .zip(&returns)
        .filter(|(a, r)| a.signum() == r.signum())
        .count();
    let priorities = batch
        .ids
        .iter()
        .zip(&raw_advantages)
        .map(|(id, a)| (*id, a.abs() + PRIORITY_EPS))
        .collect();

    let report = StepReport {
        loss: loss_value,
        policy_loss,
        value_loss,
        entropy: entropy.to_scalar::<f32>()?,
        aux_loss,
        grad_norm,
        value_error,
        advantage_accuracy: agreeing as f32 / b as f32,
        batch_size: b,
        training_steps: model.training_steps,
    };
    Ok((report, priorities))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IterationOutcome {
    Paused,
    WaitingForData {
        available: u64,
        required: usize,
    },
    Trained {
        report: StepReport,
        synced: bool,
        checkpointed: bool,
        /// Mean loss that tripped the kill switch on this step.
        kill_switch: Option<f32>,
    },
}

/// Training instance plus the bookkeeping that must survive across
/// iterations. Dropping it writes a final checkpoint and marks learning
/// inactive.
pub struct TrainingSession {
    model: TrainingModel,
    checkpoints: CheckpointStore,
    coordinator: Arc<Coordinator>,
    synced_iterations: u64,
    save_on_drop: bool,
}

impl TrainingSession {
    pub fn new(model: TrainingModel, checkpoints: CheckpointStore, coordinator: Arc<Coordinator>) -> Self {
        coordinator.set_active(true);
        Self {
            model,
            checkpoints,
            coordinator,
            synced_iterations: 0,
            save_on_drop: true,
        }
    }

    pub fn model(&self) -> &TrainingModel {
        &self.model
    }

    pub fn synced_iterations(&self) -> u64 {
        self.synced_iterations
    }

    /// Save now and skip the save on drop.
    fn finish(&mut self) {
        if let Err(e) = self.checkpoints.save(&self.model) {
            error!(error = %e, "Failed to write final checkpoint");
        }
        self.save_on_drop = false;
    }
}

impl Drop for TrainingSession {
    fn drop(&mut self) {
        self.coordinator.set_active(false);
        if self.save_on_drop {
            match self.checkpoints.save(&self.model) {
                Ok(meta) => info!(training_steps = meta.training_steps, "Checkpoint saved on exit"),
                Err(e) => error!(error = %e, "Failed to save checkpoint on exit"),
            }
        }
    }
}

pub type IterationObserver = Arc<dyn Fn(&IterationOutcome) + Send + Sync>;

#[derive(Clone)]
pub struct TrainingLoop {
    settings: TrainingSettings,
    store: Arc<ExperienceStore>,
    coordinator: Arc<Coordinator>,
    checkpoints: CheckpointStore,
    evaluator: Option<Arc<PerformanceEvaluator>>,
    observer: Option<IterationObserver>,
}

impl TrainingLoop {
    pub fn new(
        settings: TrainingSettings,
        store: Arc<ExperienceStore>,
        coordinator: Arc<Coordinator>,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            settings,
            store,
            coordinator,
            checkpoints,
            evaluator: None,
            observer: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<PerformanceEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Called after every iteration that did not error.
    pub fn with_observer(mut self, observer: IterationObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    pub fn session(&self, model: TrainingModel) -> TrainingSession {
        TrainingSession::new(model, self.checkpoints.clone(), Arc::clone(&self.coordinator))
    }

    fn sample(&self) -> Result<Vec<StoredTransition>> {
        let s = &self.settings;
        let sample = if s.prioritized_replay {
            self.store
                .prioritized(s.batch_size, s.priority_temperature, s.agent)?
        } else {
            self.store.mixed(s.batch_size, s.recent_ratio, s.agent)?
        };
        Ok(sample)
    }

    /// One iteration, blocking. Pausing and missing data are outcomes, not
    /// errors.
    pub fn iterate(&self, session: &mut TrainingSession) -> Result<IterationOutcome> {
        if self.coordinator.is_paused() {
            debug!("Learning paused, skipping iteration");
            return Ok(IterationOutcome::Paused);
        }

        let available = self.store.count_transitions(self.settings.agent)?;
        if available < self.settings.batch_size as u64 {
            info!(
                available,
                required = self.settings.batch_size,
                "Waiting for more experience"
            );
            return Ok(IterationOutcome::WaitingForData {
                available,
                required: self.settings.batch_size,
            });
        }

        let transitions = self.sample()?;
        let batch = prepare_batch(&transitions, self.settings.agent);
        let (report, priorities) = train_step(&mut session.model, &batch, &self.settings)?;

        if self.settings.prioritized_replay {
            if let Err(e) = self.store.update_priorities(&priorities) {
                warn!(error = %e, "Failed to update replay priorities");
            }
        }
        if let Some(evaluator) = &self.evaluator {
            evaluator.record_training(report.entropy, report.value_error, report.advantage_accuracy);
        }

        let kill_switch =
            self.coordinator
                .record_loss(report.loss, report.policy_loss, report.value_loss);
        self.coordinator.record_iteration(report.training_steps);

        let synced = self
            .coordinator
            .sync(session.model.net.as_ref(), session.model.training_steps);
        let mut checkpointed = false;
        if synced {
            session.synced_iterations += 1;
            if session.synced_iterations % self.settings.save_interval == 0 {
                session.checkpoints.save(&session.model)?;
                checkpointed = true;
            }
        }

        info!(
            training_steps = report.training_steps,
            loss = report.loss,
            policy_loss = report.policy_loss,
            value_loss = report.value_loss,
            entropy = report.entropy,
            grad_norm = report.grad_norm,
            batch = report.batch_size,
            synced,
            "Training iteration complete"
        );

        Ok(IterationOutcome::Trained {
            report,
            synced,
            checkpointed,
            kill_switch,
        })
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped), or
    /// until too many consecutive iterations fail. A panicking iteration
    /// counts as a failure; the session stays with the loop either way.
    pub async fn run(self, model: TrainingModel, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut session = self.session(model);
        let mut consecutive_errors = 0u32;
        info!(
            interval_secs = self.settings.interval.as_secs(),
            batch_size = self.settings.batch_size,
            prioritized = self.settings.prioritized_replay,
            "Training loop started"
        );

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping training loop");
                break;
            }

            let this = self.clone();
            let (returned, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| this.iterate(&mut session)))
                    .unwrap_or_else(|_| Err(LearnerError::Task("training iteration panicked".into())));
                (session, outcome)
            })
            .await
            .map_err(|e| LearnerError::Task(e.to_string()))?;
            session = returned;

            match outcome {
                Ok(outcome) => {
                    consecutive_errors = 0;
                    if let Some(observer) = &self.observer {
                        observer(&outcome);
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        error = %e,
                        consecutive_errors,
                        limit = self.settings.max_consecutive_errors,
                        "Training iteration failed"
                    );
                    if consecutive_errors >= self.settings.max_consecutive_errors {
                        error!("Too many consecutive training failures, stopping");
                        session.finish();
                        return Err(LearnerError::TooManyFailures {
                            count: consecutive_errors,
                            last: e.to_string(),
                        });
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, stopping training loop");
                        break;
                    }
                }
            }
        }

        info!(
            training_steps = session.model().training_steps,
            "Training loop stopped"
        );
        Ok(())
    }
}
