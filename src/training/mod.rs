/// Training infrastructure for Vdsr3d
pub mod checkpoint;
pub mod grad_clip;
pub mod loss;
pub mod optimizer;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointMetadata};
pub use grad_clip::{clip_grad_norm, global_grad_norm};
pub use loss::smooth_l1_loss;
pub use optimizer::{SgdConfig, SgdMomentum};
pub use scheduler::{StepDecayConfig, StepDecayScheduler};
pub use trainer::{EpochSummary, ProgressRecord, Trainer, TrainingConfig};
