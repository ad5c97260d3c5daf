//! Adam with checkpointable moment estimates, plus global-norm gradient
//! clipping.
//!
//! Parameters are tracked by their `VarMap` names so the first and second
//! moments can be written next to the weights and restored into a
//! freshly-built network.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::approximator::lock_vars;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamParams {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            lr: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

struct Slot {
    name: String,
    param: Var,
    m: Var,
    v: Var,
}

pub struct Adam {
    slots: Vec<Slot>,
    params: AdamParams,
    step: u64,
}

impl Adam {
    pub fn new(varmap: &VarMap, params: AdamParams) -> Result<Self> {
        let vars = lock_vars(varmap)?;
        let mut slots = Vec::with_capacity(vars.len());
        for (name, var) in vars.iter() {
            let zeros = var.as_tensor().zeros_like()?;
            slots.push(Slot {
                name: name.clone(),
                param: var.clone(),
                m: Var::from_tensor(&zeros)?,
                v: Var::from_tensor(&zeros)?,
            });
        }
        slots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self {
            slots,
            params,
            step: 0,
        })
    }

    pub fn params(&self) -> AdamParams {
        self.params
    }

    pub fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    /// Number of optimizer steps taken, which drives bias correction.
    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn vars(&self) -> Vec<Var> {
        self.slots.iter().map(|s| s.param.clone()).collect()
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step += 1;
        let AdamParams {
            lr,
            beta1,
            beta2,
            eps,
        } = self.params;
        let t = self.step as i32;
        let bias1 = 1.0 - beta1.powi(t);
        let bias2 = 1.0 - beta2.powi(t);

        for slot in &self.slots {
            let Some(grad) = grads.get(slot.param.as_tensor()) else {
                continue;
            };
            let m = slot
                .m
                .as_tensor()
                .affine(beta1, 0.0)?
                .add(&grad.affine(1.0 - beta1, 0.0)?)?;
            let v = slot
                .v
                .as_tensor()
                .affine(beta2, 0.0)?
                .add(&grad.sqr()?.affine(1.0 - beta2, 0.0)?)?;
            let m_hat = m.affine(1.0 / bias1, 0.0)?;
            let v_hat = v.affine(1.0 / bias2, 0.0)?;
            let update = m_hat.div(&v_hat.sqrt()?.affine(1.0, eps)?)?;
            let next = slot.param.as_tensor().sub(&update.affine(lr, 0.0)?)?;
            slot.param.set(&next)?;
            slot.m.set(&m)?;
            slot.v.set(&v)?;
        }
        Ok(())
    }

    /// Moment tensors keyed `m.<param>` / `v.<param>`.
    pub fn state_tensors(&self) -> HashMap<String, Tensor> {
        let mut out = HashMap::with_capacity(self.slots.len() * 2);
        for slot in &self.slots {
            out.insert(format!("m.{}", slot.name), slot.m.as_tensor().clone());
            out.insert(format!("v.{}", slot.name), slot.v.as_tensor().clone());
        }
        out
    }

    /// Restore moments saved by [`Adam::state_tensors`]. Any missing or
    /// misshapen entry is an error and leaves the optimizer partially
    /// restored, so callers should rebuild it on failure.
    pub fn load_state(&mut self, state: &HashMap<String, Tensor>, step: u64) -> Result<()> {
        for slot in &self.slots {
            for (prefix, var) in [("m", &slot.m), ("v", &slot.v)] {
                let key = format!("{}.{}", prefix, slot.name);
                let tensor = state.get(&key).ok_or_else(|| {
                    crate::error::LearnerError::CheckpointMismatch(format!(
                        "optimizer state missing '{}'",
                        key
                    ))
                })?;
                var.set(tensor)?;
            }
        }
        self.step = step;
        Ok(())
    }

    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        candle_core::safetensors::save(&self.state_tensors(), path)?;
        Ok(())
    }

    pub fn load(&mut self, path: &std::path::Path, step: u64, device: &Device) -> Result<()> {
        let state = candle_core::safetensors::load(path, device)?;
        self.load_state(&state, step)
    }
}

/// Global L2 norm of every gradient belonging to `vars`.
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f64> {
    let mut total_sq = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let sq = grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
            total_sq += f64::from(sq);
        }
    }
    Ok(total_sq.sqrt())
}

/// Rescale gradients so their global norm is at most `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let norm = grad_norm(grads, vars)?;
    if norm <= max_norm || !norm.is_finite() {
        return Ok(norm);
    }
    let scale = max_norm / (norm + 1e-6);
    for var in vars {
        if let Some(grad) = grads.remove(var.as_tensor()) {
            grads.insert(var.as_tensor(), grad.affine(scale, 0.0)?);
        }
    }
    Ok(norm)
}
