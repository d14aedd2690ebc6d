/// Volumetric super-resolution training
///
/// Usage: `train [config.json]`. Without a path every setting takes its default.
use candle_core::Device;
use vdsr3d::data::{VolumeDataLoader, VolumePairDataset};
use vdsr3d::models::loader::checkpoint_model_config;
use vdsr3d::training::{Checkpoint, Trainer, TrainingConfig};
use vdsr3d::utils::default_device;
use vdsr3d::ModelConfig;

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("=== Vdsr3d - Volumetric Super-Resolution Training ===");

    let training_config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading training configuration from: {}", path);
            TrainingConfig::from_json_file(&path)?
        }
        None => TrainingConfig::default(),
    };
    log::info!("Training configuration: {:#?}", training_config);

    // A resumed run keeps the architecture recorded in its checkpoint
    let model_config = match training_config.resume {
        Some(ref path) => checkpoint_model_config(&Checkpoint::load(path, &Device::Cpu)?)?,
        None => ModelConfig::default(),
    };
    log::info!("Model configuration: {:?}", model_config);

    let device = default_device();
    log::info!("Using device: {:?}", device);

    log::info!("Loading dataset from: {}", training_config.train_path.display());
    let dataset = VolumePairDataset::open(&training_config.train_path)?;
    let (depth, height, width) = dataset.volume_shape();
    log::info!("Dataset loaded:");
    log::info!("  - Volume pairs: {}", dataset.len());
    log::info!("  - Volume shape: {}x{}x{}", depth, height, width);

    let mut dataloader = VolumeDataLoader::new(
        dataset,
        training_config.batch_size,
        true,
        training_config.num_workers,
    )?;
    log::info!("Data loader created:");
    log::info!("  - Batch size: {}", training_config.batch_size);
    log::info!("  - Num batches: {}", dataloader.num_batches());
    log::info!("  - Prefetch workers: {}", training_config.num_workers);

    let mut trainer = Trainer::new(model_config, training_config, device)?;
    let summaries = trainer.train(&mut dataloader)?;

    if let Some(last) = summaries.last() {
        log::info!("Final checkpoint: {}", last.checkpoint.display());
    }

    Ok(())
}
