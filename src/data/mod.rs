/// Data loading modules for volumetric super-resolution training
pub mod volume_dataset;
mod prefetch;

pub use volume_dataset::{VolumeBatch, VolumeBatches, VolumeDataLoader, VolumePairDataset};

use candle_core::{Device, Tensor};

/// Generic data loader trait
pub trait BatchDataLoader {
    /// Get next batch of (input, target) tensors, both [batch, 1, D, H, W]
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<(Tensor, Tensor)>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;
}
