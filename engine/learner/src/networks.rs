//! Concrete convolutional approximators.
//!
//! Both networks read the 5x10x10 state through 3x3 same-padding
//! convolutions and share the same policy and value heads. The enhanced
//! network swaps the plain stack for a residual tower and adds the
//! auxiliary material and threat heads.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};
use draughts_core::{ACTION_SPACE_SIZE, BOARD_SIZE, NUM_CHANNELS};

use crate::approximator::{Approximator, ModelOutput, ModelSpec, MATERIAL_CLASSES};

const SQUARES: usize = BOARD_SIZE * BOARD_SIZE;
const POLICY_PLANES: usize = 8;
const VALUE_PLANES: usize = 4;
const VALUE_HIDDEN: usize = 64;

fn conv3x3(in_c: usize, out_c: usize, vb: VarBuilder) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding: 1,
        ..Default::default()
    };
    conv2d(in_c, out_c, 3, cfg, vb)
}

fn conv1x1(in_c: usize, out_c: usize, vb: VarBuilder) -> Result<Conv2d> {
    conv2d(in_c, out_c, 1, Conv2dConfig::default(), vb)
}

struct PolicyHead {
    conv: Conv2d,
    fc: Linear,
}

impl PolicyHead {
    fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv: conv1x1(channels, POLICY_PLANES, vb.pp("conv"))?,
            fc: linear(POLICY_PLANES * SQUARES, ACTION_SPACE_SIZE, vb.pp("fc"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv.forward(x)?.relu()?.flatten_from(1)?;
        self.fc.forward(&x)
    }
}

struct ValueHead {
    conv: Conv2d,
    fc1: Linear,
    fc2: Linear,
}

impl ValueHead {
    fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv: conv1x1(channels, VALUE_PLANES, vb.pp("conv"))?,
            fc1: linear(VALUE_PLANES * SQUARES, VALUE_HIDDEN, vb.pp("fc1"))?,
            fc2: linear(VALUE_HIDDEN, 1, vb.pp("fc2"))?,
        })
    }

    /// `[B]` values in `[-1, 1]`.
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv.forward(x)?.relu()?.flatten_from(1)?;
        let x = self.fc1.forward(&x)?.relu()?;
        self.fc2.forward(&x)?.tanh()?.squeeze(1)
    }
}

/// Plain three-layer convolution stack.
pub struct BaselineNet {
    spec: ModelSpec,
    varmap: VarMap,
    device: Device,
    convs: Vec<Conv2d>,
    policy: PolicyHead,
    value: ValueHead,
}

impl BaselineNet {
    pub fn new(spec: ModelSpec, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let c = spec.channels;
        let convs = vec![
            conv3x3(NUM_CHANNELS, c / 2 + 1, vb.pp("conv1"))?,
            conv3x3(c / 2 + 1, c, vb.pp("conv2"))?,
            conv3x3(c, c, vb.pp("conv3"))?,
        ];
        Ok(Self {
            spec,
            policy: PolicyHead::new(c, vb.pp("policy"))?,
            value: ValueHead::new(c, vb.pp("value"))?,
            convs,
            varmap,
            device: device.clone(),
        })
    }
}

impl Approximator for BaselineNet {
    fn spec(&self) -> ModelSpec {
        self.spec
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward_batch(&self, states: &Tensor) -> Result<ModelOutput> {
        let mut x = states.clone();
        for conv in &self.convs {
            x = conv.forward(&x)?.relu()?;
        }
        Ok(ModelOutput {
            logits: self.policy.forward(&x)?,
            value: self.value.forward(&x)?,
            material_logits: None,
            threat_logits: None,
        })
    }
}

struct ResidualBlock {
    conv1: Conv2d,
    conv2: Conv2d,
}

impl ResidualBlock {
    fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv1: conv3x3(channels, channels, vb.pp("conv1"))?,
            conv2: conv3x3(channels, channels, vb.pp("conv2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let y = self.conv1.forward(x)?.relu()?;
        let y = self.conv2.forward(&y)?;
        (x + y)?.relu()
    }
}

/// Residual tower with material and threat auxiliary heads.
pub struct EnhancedNet {
    spec: ModelSpec,
    varmap: VarMap,
    device: Device,
    stem: Conv2d,
    blocks: Vec<ResidualBlock>,
    policy: PolicyHead,
    value: ValueHead,
    material: Linear,
    threat: Conv2d,
}

impl EnhancedNet {
    pub fn new(spec: ModelSpec, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let c = spec.channels;
        let blocks = (0..spec.residual_blocks)
            .map(|i| ResidualBlock::new(c, vb.pp(format!("block{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            spec,
            stem: conv3x3(NUM_CHANNELS, c, vb.pp("stem"))?,
            blocks,
            policy: PolicyHead::new(c, vb.pp("policy"))?,
            value: ValueHead::new(c, vb.pp("value"))?,
            material: linear(c, MATERIAL_CLASSES, vb.pp("material"))?,
            threat: conv1x1(c, 1, vb.pp("threat"))?,
            varmap,
            device: device.clone(),
        })
    }
}

impl Approximator for EnhancedNet {
    fn spec(&self) -> ModelSpec {
        self.spec
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward_batch(&self, states: &Tensor) -> Result<ModelOutput> {
        let mut x = self.stem.forward(states)?.relu()?;
        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        // global average pool: [B, C, 10, 10] -> [B, C]
        let pooled = x.mean(3)?.mean(2)?;
        Ok(ModelOutput {
            logits: self.policy.forward(&x)?,
            value: self.value.forward(&x)?,
            material_logits: Some(self.material.forward(&pooled)?),
            threat_logits: Some(self.threat.forward(&x)?.squeeze(1)?),
        })
    }
}
