//! The approximator contract shared by every network architecture.
//!
//! An approximator maps an encoded `[5, 10, 10]` state to policy logits over
//! the 2,500-entry action space and a value in `[-1, 1]`. The enhanced
//! architecture adds two auxiliary heads (material balance class and a
//! per-square threat map). Every implementation owns its `VarMap`, which is
//! what checkpointing and the serving copy operate on.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarMap;
use draughts_core::{BOARD_SIZE, NUM_CHANNELS};
use engine_config::ModelConfig;
use serde::{Deserialize, Serialize};

use crate::error::{LearnerError, Result};
use crate::networks::{BaselineNet, EnhancedNet};

/// Number of material-balance classes predicted by the auxiliary head:
/// behind, level, ahead.
pub const MATERIAL_CLASSES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Baseline,
    Enhanced,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::Baseline => "baseline",
            Architecture::Enhanced => "enhanced",
        }
    }

    pub fn has_aux_heads(self) -> bool {
        matches!(self, Architecture::Enhanced)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = LearnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(Architecture::Baseline),
            "enhanced" => Ok(Architecture::Enhanced),
            other => Err(LearnerError::Config(format!(
                "unknown architecture '{}' (expected baseline or enhanced)",
                other
            ))),
        }
    }
}

/// Shape-determining hyperparameters. Two instances with equal specs have
/// identical parameter names and shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub architecture: Architecture,
    pub channels: usize,
    pub residual_blocks: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            architecture: Architecture::Enhanced,
            channels: 64,
            residual_blocks: 3,
        }
    }
}

impl ModelSpec {
    pub fn baseline() -> Self {
        Self {
            architecture: Architecture::Baseline,
            ..Self::default()
        }
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let spec = Self {
            architecture: config.architecture.parse()?,
            channels: config.channels,
            residual_blocks: config.residual_blocks,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(LearnerError::Config("model channels must be > 0".into()));
        }
        Ok(())
    }
}

/// Raw batched network output.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `[B, 2500]` unnormalised action scores.
    pub logits: Tensor,
    /// `[B]` tanh-squashed state values.
    pub value: Tensor,
    /// `[B, 3]` material-class logits (enhanced only).
    pub material_logits: Option<Tensor>,
    /// `[B, 10, 10]` threat logits (enhanced only).
    pub threat_logits: Option<Tensor>,
}

/// Single-state evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Probability distribution over all 2,500 actions.
    pub policy: Vec<f32>,
    pub value: f32,
}

/// Single-state evaluation including the auxiliary heads when present.
#[derive(Debug, Clone)]
pub struct AuxEvaluation {
    pub policy: Vec<f32>,
    pub value: f32,
    pub material: Option<Vec<f32>>,
    /// Row-major 10x10 capture probabilities.
    pub threat: Option<Vec<f32>>,
}

pub trait Approximator: Send + Sync {
    fn spec(&self) -> ModelSpec;

    fn varmap(&self) -> &VarMap;

    fn device(&self) -> &Device;

    /// Batched forward pass over `[B, 5, 10, 10]` states.
    fn forward_batch(&self, states: &Tensor) -> candle_core::Result<ModelOutput>;

    fn forward(&self, state: &[f32]) -> Result<Evaluation> {
        let out = self.forward_batch(&state_tensor(state, self.device())?)?;
        let policy = candle_nn::ops::softmax(&out.logits, D::Minus1)?;
        Ok(Evaluation {
            policy: policy.squeeze(0)?.to_vec1::<f32>()?,
            value: out.value.squeeze(0)?.to_scalar::<f32>()?,
        })
    }

    fn forward_with_aux(&self, state: &[f32]) -> Result<AuxEvaluation> {
        let out = self.forward_batch(&state_tensor(state, self.device())?)?;
        let policy = candle_nn::ops::softmax(&out.logits, D::Minus1)?;
        let material = match &out.material_logits {
            Some(logits) => Some(
                candle_nn::ops::softmax(logits, D::Minus1)?
                    .squeeze(0)?
                    .to_vec1::<f32>()?,
            ),
            None => None,
        };
        let threat = match &out.threat_logits {
            Some(logits) => Some(
                candle_nn::ops::sigmoid(logits)?
                    .squeeze(0)?
                    .flatten_all()?
                    .to_vec1::<f32>()?,
            ),
            None => None,
        };
        Ok(AuxEvaluation {
            policy: policy.squeeze(0)?.to_vec1::<f32>()?,
            value: out.value.squeeze(0)?.to_scalar::<f32>()?,
            material,
            threat,
        })
    }
}

/// Wrap one encoded state as a `[1, 5, 10, 10]` tensor.
pub fn state_tensor(state: &[f32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(
        state,
        (1, NUM_CHANNELS, BOARD_SIZE, BOARD_SIZE),
        device,
    )?)
}

/// Build a freshly initialised approximator for `spec`.
pub fn build(spec: ModelSpec, device: &Device) -> Result<Box<dyn Approximator>> {
    spec.validate()?;
    let model: Box<dyn Approximator> = match spec.architecture {
        Architecture::Baseline => Box::new(BaselineNet::new(spec, device)?),
        Architecture::Enhanced => Box::new(EnhancedNet::new(spec, device)?),
    };
    Ok(model)
}

/// Copy every parameter of `src` into `dst` by name.
///
/// The copy is deep: `dst` shares no storage with `src` afterwards.
pub fn copy_into(src: &dyn Approximator, dst: &dyn Approximator) -> Result<()> {
    if src.spec() != dst.spec() {
        return Err(LearnerError::CheckpointMismatch(format!(
            "cannot copy {:?} into {:?}",
            src.spec(),
            dst.spec()
        )));
    }
    let src_vars = lock_vars(src.varmap())?;
    let dst_vars = lock_vars(dst.varmap())?;
    for (name, var) in dst_vars.iter() {
        let source = src_vars.get(name).ok_or_else(|| {
            LearnerError::CheckpointMismatch(format!("parameter '{}' missing from source", name))
        })?;
        var.set(source.as_tensor())?;
    }
    Ok(())
}

/// A new instance holding a deep copy of `src`'s parameters.
pub fn deep_copy(src: &dyn Approximator) -> Result<Box<dyn Approximator>> {
    let copy = build(src.spec(), src.device())?;
    copy_into(src, copy.as_ref())?;
    Ok(copy)
}

pub fn parameter_count(model: &dyn Approximator) -> usize {
    model
        .varmap()
        .all_vars()
        .iter()
        .map(|v| v.elem_count())
        .sum()
}

/// Flatten every parameter into `(name, values)` pairs sorted by name.
pub fn parameter_snapshot(model: &dyn Approximator) -> Result<Vec<(String, Vec<f32>)>> {
    let vars = lock_vars(model.varmap())?;
    let mut snapshot = Vec::with_capacity(vars.len());
    for (name, var) in vars.iter() {
        let values = var
            .as_tensor()
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        snapshot.push((name.clone(), values));
    }
    snapshot.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(snapshot)
}

pub(crate) fn lock_vars(
    varmap: &VarMap,
) -> Result<std::sync::MutexGuard<'_, std::collections::HashMap<String, candle_core::Var>>> {
    varmap
        .data()
        .lock()
        .map_err(|e| LearnerError::LockPoisoned(e.to_string()))
}
