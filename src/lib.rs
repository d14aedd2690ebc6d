//! vdsr3d - volumetric residual super-resolution training on candle
//!
//! Trains a 3D convolutional network that predicts a residual volume which,
//! added to a low-resolution input, approximates the high-resolution target.
//!
//! # Architecture
//!
//! - **Input projection**: 3x3x3 conv, 1 -> 64 channels, ReLU
//! - **Feature blocks**: `block_count` x (3x3x3 conv, 64 -> 64, ReLU)
//! - **Output projection**: 3x3x3 conv, 64 -> 1
//! - **Global residual**: the network input is added to the projection output
//!
//! # Example
//!
//! ```ignore
//! use vdsr3d::{ModelConfig, data::{VolumePairDataset, VolumeDataLoader}};
//! use vdsr3d::training::{Trainer, TrainingConfig};
//!
//! let config = TrainingConfig::default();
//! let dataset = VolumePairDataset::open(&config.train_path)?;
//! let mut loader = VolumeDataLoader::new(dataset, config.batch_size, true, config.num_workers)?;
//! let mut trainer = Trainer::new(ModelConfig::default(), config, Device::Cpu)?;
//! trainer.train(&mut loader)?;
//! ```

pub mod config;
pub mod data;
pub mod layers;
pub mod models;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::ModelConfig;
pub use models::Vdsr3d;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum VdsrError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("Index {index} out of range for dataset of {len} samples")]
    Index { index: usize, len: usize },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),
}

pub type Result<T> = std::result::Result<T, VdsrError>;
