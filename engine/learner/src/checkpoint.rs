//! On-disk checkpoints.
//!
//! A checkpoint directory holds three files:
//! - `model.safetensors`: network parameters by `VarMap` name
//! - `optimizer.safetensors`: Adam moments
//! - `meta.json`: step counters, recent losses, and the shape contract
//!   (`action_space_size`, architecture, widths)
//!
//! Each file is written to a `.tmp` sibling and renamed into place, and
//! `meta.json` is renamed last. A watcher keyed on `meta.json` therefore
//! finds the matching weights already on disk when it fires. A first save
//! interrupted before the metadata leaves no loadable checkpoint. A reader
//! that loads between the two renames of a later save may pair new weights
//! with the previous step counters.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use candle_core::Device;
use draughts_core::ACTION_SPACE_SIZE;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::approximator::{build, Approximator, ModelSpec};
use crate::error::{LearnerError, Result};
use crate::optimizer::{Adam, AdamParams};

pub const MODEL_FILE: &str = "model.safetensors";
pub const OPTIMIZER_FILE: &str = "optimizer.safetensors";
pub const META_FILE: &str = "meta.json";

/// Bumped whenever the on-disk layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub format_version: u32,
    pub action_space_size: usize,
    pub spec: ModelSpec,
    pub training_steps: u64,
    pub optimizer_steps: u64,
    pub policy_loss: Option<f32>,
    pub value_loss: Option<f32>,
    pub saved_at: u64,
}

impl CheckpointMeta {
    /// Fails when the checkpoint cannot be loaded into a network built from
    /// `expected`.
    pub fn check_compatible(&self, expected: &ModelSpec) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(LearnerError::CheckpointMismatch(format!(
                "format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        if self.action_space_size != ACTION_SPACE_SIZE {
            return Err(LearnerError::CheckpointMismatch(format!(
                "action space {} (expected {})",
                self.action_space_size, ACTION_SPACE_SIZE
            )));
        }
        if &self.spec != expected {
            return Err(LearnerError::CheckpointMismatch(format!(
                "model {:?} (expected {:?})",
                self.spec, expected
            )));
        }
        Ok(())
    }
}

/// Network, optimizer and counters owned by the training side.
pub struct TrainingModel {
    pub net: Box<dyn Approximator>,
    pub optimizer: Adam,
    pub training_steps: u64,
    pub policy_loss: Option<f32>,
    pub value_loss: Option<f32>,
}

impl TrainingModel {
    pub fn fresh(spec: ModelSpec, params: AdamParams, device: &Device) -> Result<Self> {
        let net = build(spec, device)?;
        let optimizer = Adam::new(net.varmap(), params)?;
        Ok(Self {
            net,
            optimizer,
            training_steps: 0,
            policy_loss: None,
            value_loss: None,
        })
    }

    pub fn spec(&self) -> ModelSpec {
        self.net.spec()
    }

    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            format_version: FORMAT_VERSION,
            action_space_size: ACTION_SPACE_SIZE,
            spec: self.net.spec(),
            training_steps: self.training_steps,
            optimizer_steps: self.optimizer.step_count(),
            policy_loss: self.policy_loss,
            value_loss: self.value_loss,
            saved_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

/// Filesystem layout of one checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn exists(&self) -> bool {
        self.meta_path().exists() && self.dir.join(MODEL_FILE).exists()
    }

    pub fn read_meta(&self) -> Result<CheckpointMeta> {
        let path = self.meta_path();
        if !path.exists() {
            return Err(LearnerError::NoCheckpoint(self.dir.display().to_string()));
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write weights, then optimizer state, then metadata.
    pub fn save(&self, model: &TrainingModel) -> Result<CheckpointMeta> {
        fs::create_dir_all(&self.dir)?;

        let model_tmp = self.dir.join(format!("{MODEL_FILE}.tmp"));
        model.net.varmap().save(&model_tmp)?;
        fs::rename(&model_tmp, self.dir.join(MODEL_FILE))?;

        let opt_tmp = self.dir.join(format!("{OPTIMIZER_FILE}.tmp"));
        model.optimizer.save(&opt_tmp)?;
        fs::rename(&opt_tmp, self.dir.join(OPTIMIZER_FILE))?;

        let meta = model.meta();
        let meta_tmp = self.dir.join(format!("{META_FILE}.tmp"));
        fs::write(&meta_tmp, serde_json::to_string_pretty(&meta)?)?;
        fs::rename(&meta_tmp, self.meta_path())?;

        info!(
            dir = %self.dir.display(),
            training_steps = meta.training_steps,
            "Saved checkpoint"
        );
        Ok(meta)
    }

    /// Load network weights only, for serving.
    pub fn load_network(
        &self,
        expected: &ModelSpec,
        device: &Device,
    ) -> Result<(Box<dyn Approximator>, CheckpointMeta)> {
        let meta = self.read_meta()?;
        meta.check_compatible(expected)?;
        let net = build(*expected, device)?;
        load_weights(net.as_ref(), &self.dir.join(MODEL_FILE))?;
        Ok((net, meta))
    }

    /// Load the full training state. A missing or unreadable optimizer file
    /// only resets the optimizer.
    pub fn load_training(
        &self,
        expected: &ModelSpec,
        params: AdamParams,
        device: &Device,
    ) -> Result<TrainingModel> {
        let (net, meta) = self.load_network(expected, device)?;
        let mut optimizer = Adam::new(net.varmap(), params)?;
        let opt_path = self.dir.join(OPTIMIZER_FILE);
        if opt_path.exists() {
            if let Err(e) = optimizer.load(&opt_path, meta.optimizer_steps, device) {
                warn!(error = %e, "Optimizer state unusable, starting optimizer fresh");
                optimizer = Adam::new(net.varmap(), params)?;
            }
        } else {
            debug!("No optimizer state in checkpoint");
        }
        Ok(TrainingModel {
            net,
            optimizer,
            training_steps: meta.training_steps,
            policy_loss: meta.policy_loss,
            value_loss: meta.value_loss,
        })
    }

    /// Load the checkpoint, or start fresh when there is none or it does not
    /// fit `spec`.
    pub fn load_or_fresh(
        &self,
        spec: &ModelSpec,
        params: AdamParams,
        device: &Device,
    ) -> Result<TrainingModel> {
        match self.load_training(spec, params, device) {
            Ok(model) => {
                info!(
                    dir = %self.dir.display(),
                    training_steps = model.training_steps,
                    architecture = %spec.architecture,
                    "Loaded checkpoint"
                );
                Ok(model)
            }
            Err(LearnerError::NoCheckpoint(_)) => {
                info!(architecture = %spec.architecture, "No checkpoint, initialising fresh model");
                TrainingModel::fresh(*spec, params, device)
            }
            Err(e) => {
                warn!(error = %e, "Checkpoint incompatible, initialising fresh model");
                TrainingModel::fresh(*spec, params, device)
            }
        }
    }
}

fn load_weights(net: &dyn Approximator, path: &Path) -> Result<()> {
    // The clone shares variables with `net`. Loading fails on missing names
    // or shape mismatches.
    let mut varmap = net.varmap().clone();
    varmap
        .load(path)
        .map_err(|e| LearnerError::CheckpointMismatch(e.to_string()))?;
    Ok(())
}
