/// Training loop for Vdsr3d
use candle_core::{Device, DType, Tensor, Var};
use candle_nn::{Optimizer, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::data::BatchDataLoader;
use crate::models::loader::checkpoint_model_config;
use crate::utils::count_parameters;
use crate::{ModelConfig, Vdsr3d, VdsrError};
use super::checkpoint::{Checkpoint, CheckpointManager, CheckpointMetadata};
use super::grad_clip::clip_grad_norm;
use super::loss::smooth_l1_loss;
use super::optimizer::{SgdConfig, SgdMomentum};
use super::scheduler::{StepDecayConfig, StepDecayScheduler};

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Batch size
    pub batch_size: usize,
    /// First epoch number (1-based); later than 1 when continuing a run
    pub start_epoch: usize,
    /// Number of training epochs
    pub num_epochs: usize,
    /// Learning rate (initial)
    pub learning_rate: f64,
    /// Decay the learning rate by 10x every this many epochs
    pub lr_step: usize,
    /// Maximum global gradient norm
    pub grad_clip: f64,
    /// Batch prefetch workers (0 = synchronous)
    pub num_workers: usize,
    /// SGD momentum
    pub momentum: f64,
    /// Weight decay
    pub weight_decay: f64,
    /// Paired-volume `.npz` container
    pub train_path: PathBuf,
    /// Label embedded in the run directory name
    pub run_label: String,
    /// Directory holding one subdirectory per run
    pub checkpoint_root: PathBuf,
    /// Log progress every N iterations
    pub log_every: usize,
    /// Checkpoint whose weights initialize the model
    pub resume: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            start_epoch: 1,
            num_epochs: 10,
            learning_rate: 0.1,
            lr_step: 10,
            grad_clip: 0.4,
            num_workers: 0,
            momentum: 0.9,
            weight_decay: 1e-4,
            train_path: PathBuf::from("train_data/3dtrain.npz"),
            run_label: "L_".to_string(),
            checkpoint_root: PathBuf::from("model"),
            log_every: 100,
            resume: None,
        }
    }
}

impl TrainingConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(VdsrError::Config("batch_size must be > 0".to_string()));
        }

        if self.start_epoch == 0 {
            return Err(VdsrError::Config(
                "start_epoch is 1-based and must be > 0".to_string(),
            ));
        }

        if self.lr_step == 0 {
            return Err(VdsrError::Config("lr_step must be > 0".to_string()));
        }

        if !(self.grad_clip > 0.0 && self.grad_clip.is_finite()) {
            return Err(VdsrError::Config(format!(
                "grad_clip must be a positive finite number, got {}",
                self.grad_clip
            )));
        }

        if self.log_every == 0 {
            return Err(VdsrError::Config("log_every must be > 0".to_string()));
        }

        Ok(())
    }

    /// Epoch numbers this configuration runs, in order
    pub fn epochs(&self) -> std::ops::Range<usize> {
        self.start_epoch..self.start_epoch + self.num_epochs
    }
}

/// One progress line of an epoch
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub epoch: usize,
    /// 1-based iteration within the epoch
    pub iteration: usize,
    pub total_iterations: usize,
    pub loss: f32,
    /// Wall time since the previous record (or the epoch start)
    pub elapsed: Duration,
}

/// Outcome of one epoch
#[derive(Debug, Clone)]
pub struct EpochSummary {
    pub epoch: usize,
    pub lr: f64,
    /// Loss of every iteration, in order
    pub losses: Vec<f32>,
    pub progress: Vec<ProgressRecord>,
    pub checkpoint: PathBuf,
}

impl EpochSummary {
    pub fn iterations(&self) -> usize {
        self.losses.len()
    }

    pub fn mean_loss(&self) -> f64 {
        self.losses.iter().map(|&l| l as f64).sum::<f64>() / self.losses.len().max(1) as f64
    }
}

/// Trainer for Vdsr3d
pub struct Trainer {
    model: Vdsr3d,
    model_config: ModelConfig,
    varmap: VarMap,
    params: Vec<Var>,
    optimizer: SgdMomentum,
    scheduler: StepDecayScheduler,
    checkpoints: CheckpointManager,
    config: TrainingConfig,
    device: Device,
    step: usize,
}

impl Trainer {
    /// Create new trainer
    ///
    /// Builds a freshly initialized model (or restores `config.resume`) and
    /// fixes the run directory for the lifetime of the trainer.
    pub fn new(
        model_config: ModelConfig,
        training_config: TrainingConfig,
        device: Device,
    ) -> crate::Result<Self> {
        training_config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Vdsr3d::new(model_config.clone(), vb)?;
        let params = named_parameters(&varmap, &model.parameter_names())?;

        log::info!(
            "Model built: {} feature blocks, {} parameters",
            model_config.block_count,
            count_parameters(&params)
        );

        let optimizer = SgdMomentum::new(
            params.clone(),
            SgdConfig {
                lr: training_config.learning_rate,
                momentum: training_config.momentum,
                weight_decay: training_config.weight_decay,
            },
        )?;

        let scheduler = StepDecayScheduler::new(StepDecayConfig {
            base_lr: training_config.learning_rate,
            step_size: training_config.lr_step,
            gamma: 0.1,
        })?;

        let checkpoints =
            CheckpointManager::new(&training_config.checkpoint_root, &training_config.run_label);
        log::info!("Checkpoints will be written to {}", checkpoints.run_dir().display());

        let trainer = Self {
            model,
            model_config,
            varmap,
            params,
            optimizer,
            scheduler,
            checkpoints,
            config: training_config,
            device,
            step: 0,
        };

        if let Some(ref path) = trainer.config.resume {
            trainer.restore_weights(path)?;
        }

        Ok(trainer)
    }

    pub fn model(&self) -> &Vdsr3d {
        &self.model
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Directory receiving this run's checkpoints
    pub fn run_dir(&self) -> &Path {
        self.checkpoints.run_dir()
    }

    /// Optimizer steps taken so far
    pub fn step(&self) -> usize {
        self.step
    }

    /// Learning rate currently installed in the optimizer
    pub fn current_lr(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Overwrite every parameter with the weights stored in a checkpoint
    ///
    /// The checkpoint must describe the same architecture as the model and
    /// hold no tensors the model does not own.
    fn restore_weights(&self, path: &Path) -> crate::Result<()> {
        log::info!("Restoring weights from {}", path.display());

        let checkpoint = Checkpoint::load(path, &self.device)?;
        let stored = checkpoint_model_config(&checkpoint)?;
        if stored != self.model_config {
            return Err(VdsrError::Checkpoint(format!(
                "{} holds a model with {} feature blocks, expected {}",
                path.display(),
                stored.block_count,
                self.model_config.block_count
            )));
        }

        let names = self.model.parameter_names();
        if let Some(extra) = checkpoint.tensors.keys().find(|k| !names.contains(*k)) {
            return Err(VdsrError::Checkpoint(format!(
                "{} has tensor {} that the model does not own",
                path.display(),
                extra
            )));
        }

        for (name, var) in names.iter().zip(self.params.iter()) {
            let tensor = checkpoint.tensors.get(name).ok_or_else(|| {
                VdsrError::Checkpoint(format!(
                    "{} has no tensor for parameter {}",
                    path.display(),
                    name
                ))
            })?;
            var.set(&tensor.to_dtype(DType::F32)?)?;
        }

        Ok(())
    }

    /// Training step: forward, loss, backward, clip, update
    ///
    /// # Returns
    /// Scalar loss of the batch before the update
    pub fn train_step(&mut self, inputs: &Tensor, targets: &Tensor) -> crate::Result<f32> {
        let prediction = self.model.forward(inputs)?;
        let loss = smooth_l1_loss(&prediction, targets)?;
        let loss_val = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;

        // Every backward pass starts from an empty gradient store
        let mut grads = loss.backward()?;
        let grad_norm = clip_grad_norm(&self.params, &mut grads, self.config.grad_clip)?;
        log::debug!("Step {}: loss={:.6}, grad_norm={:.6}", self.step, loss_val, grad_norm);

        self.optimizer.step(&grads)?;
        self.step += 1;

        Ok(loss_val)
    }

    /// Save checkpoint for `epoch`
    pub fn save_checkpoint(&self, epoch: usize, lr: f64, loss: Option<f64>) -> crate::Result<PathBuf> {
        let tensors: HashMap<String, Tensor> = {
            let data = self
                .varmap
                .data()
                .lock()
                .map_err(|_| VdsrError::Training("parameter map lock poisoned".to_string()))?;
            data.iter()
                .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
                .collect()
        };

        let metadata = CheckpointMetadata {
            epoch,
            lr,
            loss,
            config: Some(self.model_config.to_json()?),
        };

        self.checkpoints.save(tensors, metadata)
    }

    /// Train for one epoch and checkpoint the result
    ///
    /// # Arguments
    /// * `epoch` - 1-based epoch number; selects the learning rate
    /// * `dataloader` - Source of batches; reset to start a fresh pass
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        dataloader: &mut impl BatchDataLoader,
    ) -> crate::Result<EpochSummary> {
        let lr = self.scheduler.lr_at_epoch(epoch.saturating_sub(1));
        self.optimizer.set_learning_rate(lr);
        log::info!("Epoch={}, lr={}", epoch, lr);

        dataloader.reset();
        let total = dataloader.num_batches();

        let mut losses = Vec::with_capacity(total);
        let mut progress = Vec::new();
        let mut last_record = Instant::now();

        while let Some((inputs, targets)) = dataloader.next_batch(&self.device)? {
            let loss = self.train_step(&inputs, &targets)?;
            losses.push(loss);
            let iteration = losses.len();

            if !loss.is_finite() {
                log::warn!("Epoch {} iteration {}: non-finite loss {}", epoch, iteration, loss);
            }

            if iteration % self.config.log_every == 0 || iteration == total {
                let record = ProgressRecord {
                    epoch,
                    iteration,
                    total_iterations: total,
                    loss,
                    elapsed: last_record.elapsed(),
                };
                log::info!(
                    "===> Epoch[{}]({}/{}): Loss: {:.10}, consume time: {:.3}s",
                    record.epoch,
                    record.iteration,
                    record.total_iterations,
                    record.loss,
                    record.elapsed.as_secs_f64()
                );
                progress.push(record);
                last_record = Instant::now();
            }
        }

        if losses.is_empty() {
            return Err(VdsrError::Training(format!(
                "epoch {} produced no batches",
                epoch
            )));
        }

        let mut summary = EpochSummary {
            epoch,
            lr,
            losses,
            progress,
            checkpoint: PathBuf::new(),
        };
        summary.checkpoint = self.save_checkpoint(epoch, lr, Some(summary.mean_loss()))?;

        Ok(summary)
    }

    /// Full training loop
    pub fn train(&mut self, dataloader: &mut impl BatchDataLoader) -> crate::Result<Vec<EpochSummary>> {
        let epochs = self.config.epochs();
        log::info!(
            "Starting training for {} epochs ({}..={})",
            self.config.num_epochs,
            epochs.start,
            epochs.end.saturating_sub(1)
        );
        log::info!("Total batches per epoch: {}", dataloader.num_batches());

        let mut summaries = Vec::with_capacity(self.config.num_epochs);
        for epoch in epochs {
            let summary = self.train_epoch(epoch, dataloader)?;

            log::info!(
                "Epoch {} complete: avg_loss={:.6}, step={}",
                epoch,
                summary.mean_loss(),
                self.step
            );

            summaries.push(summary);
        }

        log::info!("Training complete!");

        Ok(summaries)
    }
}

/// Look up the variables behind `names` in registration order
fn named_parameters(varmap: &VarMap, names: &[String]) -> crate::Result<Vec<Var>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| VdsrError::Training("parameter map lock poisoned".to_string()))?;

    names
        .iter()
        .map(|name| {
            data.get(name)
                .cloned()
                .ok_or_else(|| VdsrError::Training(format!("parameter {} is not registered", name)))
        })
        .collect()
}
