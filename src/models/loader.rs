/// Model reconstruction from checkpoint files
use std::path::Path;
use candle_core::{Device, DType};
use candle_nn::VarBuilder;
use crate::training::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::ModelConfig;
use super::Vdsr3d;

/// Architecture recorded in a checkpoint
///
/// Uses the configuration stored in the metadata, or counts the
/// `features.<i>.weight` tensors when the metadata carries none.
pub fn checkpoint_model_config(checkpoint: &Checkpoint) -> crate::Result<ModelConfig> {
    match checkpoint.metadata.config {
        Some(ref json) => ModelConfig::from_json(json),
        None => Ok(ModelConfig {
            block_count: checkpoint
                .tensors
                .keys()
                .filter(|name| name.starts_with("features."))
                .count(),
        }),
    }
}

/// Load model from a checkpoint written during training
///
/// The architecture is resolved by [`checkpoint_model_config`].
///
/// # Arguments
/// * `weights_path` - Path to a `model_epoch_<N>.safetensors` file
/// * `device` - Device to load model on
///
/// # Returns
/// Loaded network and the checkpoint's metadata
pub fn load_model<P: AsRef<Path>>(
    weights_path: P,
    device: &Device,
) -> crate::Result<(Vdsr3d, CheckpointMetadata)> {
    let checkpoint = Checkpoint::load(weights_path, device)?;

    let config = checkpoint_model_config(&checkpoint)?;

    let vb = VarBuilder::from_tensors(checkpoint.tensors, DType::F32, device);
    let model = Vdsr3d::new(config, vb)?;

    Ok((model, checkpoint.metadata))
}
