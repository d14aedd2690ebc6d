/// Residual volumetric super-resolution network
use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;
use crate::config::ModelConfig;
use crate::layers::Conv3d;

pub mod loader;

/// Feature block: 3x3x3 conv (64 -> 64) followed by ReLU
///
/// There is no skip connection inside a block.
pub struct ConvReluBlock {
    conv: Conv3d,
}

impl ConvReluBlock {
    /// Create new block
    pub fn new(vb: VarBuilder) -> Result<Self> {
        let channels = ModelConfig::FEATURE_CHANNELS;
        let conv = Conv3d::new(channels, channels, vb)?;
        Ok(Self { conv })
    }
}

impl Module for ConvReluBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.conv.forward(xs)?.relu()
    }
}

/// Stack of feature blocks applied in strict sequence
pub struct FeatureExtractor {
    blocks: Vec<ConvReluBlock>,
}

impl FeatureExtractor {
    /// Create `block_count` blocks named `0`, `1`, ... under `vb`
    pub fn new(block_count: usize, vb: VarBuilder) -> Result<Self> {
        let mut blocks = Vec::with_capacity(block_count);
        for i in 0..block_count {
            blocks.push(ConvReluBlock::new(vb.pp(i.to_string()))?);
        }
        Ok(Self { blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Module for FeatureExtractor {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut hidden = xs.clone();
        for block in &self.blocks {
            hidden = block.forward(&hidden)?;
        }
        Ok(hidden)
    }
}

/// Main network
///
/// input projection -> feature blocks -> output projection, plus a single
/// network-level skip adding the input volume to the prediction.
pub struct Vdsr3d {
    config: ModelConfig,
    input: Conv3d,
    features: FeatureExtractor,
    output: Conv3d,
}

impl Vdsr3d {
    /// Create new network; every convolution is drawn with the fan-out scheme
    pub fn new(config: ModelConfig, vb: VarBuilder) -> Result<Self> {
        let input = Conv3d::new(
            ModelConfig::IMAGE_CHANNELS,
            ModelConfig::FEATURE_CHANNELS,
            vb.pp("input"),
        )?;
        let features = FeatureExtractor::new(config.block_count, vb.pp("features"))?;
        let output = Conv3d::new(
            ModelConfig::FEATURE_CHANNELS,
            ModelConfig::IMAGE_CHANNELS,
            vb.pp("output"),
        )?;

        Ok(Self {
            config,
            input,
            features,
            output,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Layer identifiers of every weight, in network order
    ///
    /// These are the keys under which the weights live in the `VarMap` and
    /// in checkpoint files.
    pub fn parameter_names(&self) -> Vec<String> {
        parameter_names(&self.config)
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `xs` - Low-resolution volumes [batch, 1, D, H, W]
    ///
    /// # Returns
    /// Reconstructed volumes [batch, 1, D, H, W]
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let hidden = self.input.forward(xs)?.relu()?;
        let hidden = self.features.forward(&hidden)?;
        let residual = self.output.forward(&hidden)?;
        residual + xs
    }
}

impl Module for Vdsr3d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Vdsr3d::forward(self, xs)
    }
}

/// Layer identifiers for a given configuration, in network order
pub fn parameter_names(config: &ModelConfig) -> Vec<String> {
    let mut names = Vec::with_capacity(config.conv_count());
    names.push("input.weight".to_string());
    for i in 0..config.block_count {
        names.push(format!("features.{}.weight", i));
    }
    names.push("output.weight".to_string());
    names
}
