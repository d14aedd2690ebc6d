/// Model checkpointing with safetensors
///
/// Each epoch produces one `model_epoch_<N>.safetensors` file inside a run
/// directory named `<timestamp><label>_model`. Weights are keyed by layer
/// identifier; epoch, learning rate, loss and model configuration live in the
/// safetensors header metadata.
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use candle_core::{Device, Tensor};
use chrono::{DateTime, Local};
use safetensors::tensor::SafeTensors;

use crate::VdsrError;

/// Timestamp layout used in run directory names
const RUN_TIMESTAMP_FORMAT: &str = "%m%d-%H%M%S";

/// Fixed suffix of every run directory
const RUN_DIR_SUFFIX: &str = "_model";

const META_EPOCH: &str = "epoch";
const META_LR: &str = "lr";
const META_LOSS: &str = "loss";
const META_CONFIG: &str = "config";

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Epoch (1-based) the checkpoint was taken after
    pub epoch: usize,
    /// Learning rate used during that epoch
    pub lr: f64,
    /// Mean training loss over the epoch
    pub loss: Option<f64>,
    /// Model configuration (as JSON string)
    pub config: Option<String>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            epoch: 0,
            lr: 0.0,
            loss: None,
            config: None,
        }
    }
}

impl CheckpointMetadata {
    fn to_header(&self) -> HashMap<String, String> {
        let mut header = HashMap::new();
        header.insert(META_EPOCH.to_string(), self.epoch.to_string());
        header.insert(META_LR.to_string(), self.lr.to_string());
        if let Some(loss) = self.loss {
            header.insert(META_LOSS.to_string(), loss.to_string());
        }
        if let Some(ref config) = self.config {
            header.insert(META_CONFIG.to_string(), config.clone());
        }
        header
    }

    fn from_header(header: &HashMap<String, String>) -> crate::Result<Self> {
        let epoch = header
            .get(META_EPOCH)
            .ok_or_else(|| VdsrError::Checkpoint("metadata has no epoch".to_string()))?
            .parse::<usize>()
            .map_err(|e| VdsrError::Checkpoint(format!("invalid epoch in metadata: {}", e)))?;
        let lr = match header.get(META_LR) {
            Some(lr) => lr
                .parse::<f64>()
                .map_err(|e| VdsrError::Checkpoint(format!("invalid lr in metadata: {}", e)))?,
            None => 0.0,
        };
        let loss = match header.get(META_LOSS) {
            Some(loss) => Some(
                loss.parse::<f64>()
                    .map_err(|e| VdsrError::Checkpoint(format!("invalid loss in metadata: {}", e)))?,
            ),
            None => None,
        };

        Ok(Self {
            epoch,
            lr,
            loss,
            config: header.get(META_CONFIG).cloned(),
        })
    }
}

/// Model checkpoint
pub struct Checkpoint {
    /// Model parameters keyed by layer identifier
    pub tensors: HashMap<String, Tensor>,
    /// Metadata
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Create new checkpoint
    pub fn new(tensors: HashMap<String, Tensor>, metadata: CheckpointMetadata) -> Self {
        Self { tensors, metadata }
    }

    /// Serialize to safetensors bytes
    fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        let header = Some(self.metadata.to_header());
        Ok(safetensors::tensor::serialize(self.tensors.iter(), &header)?)
    }

    /// Save checkpoint to file
    ///
    /// The bytes go to a `.tmp` sibling first and are renamed into place once
    /// flushed, so `path` only ever holds a complete checkpoint. On failure
    /// the sibling is removed.
    ///
    /// # Arguments
    /// * `path` - Path to save checkpoint
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let written = write_synced(&tmp_path, &bytes).and_then(|_| fs::rename(&tmp_path, path));
        if let Err(e) = written {
            if tmp_path.exists() {
                if let Err(cleanup) = fs::remove_file(&tmp_path) {
                    log::warn!("Could not remove {}: {}", tmp_path.display(), cleanup);
                }
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Load checkpoint from file
    ///
    /// # Arguments
    /// * `path` - Path to checkpoint file
    /// * `device` - Device to load tensors on
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> crate::Result<Self> {
        let data = fs::read(path.as_ref())?;

        let (_, header) = SafeTensors::read_metadata(&data)?;
        let metadata = match header.metadata() {
            Some(map) => CheckpointMetadata::from_header(map)?,
            None => {
                return Err(VdsrError::Checkpoint(format!(
                    "{} has no checkpoint metadata",
                    path.as_ref().display()
                )))
            }
        };

        let tensors = candle_core::safetensors::load_buffer(&data, device)?;

        Ok(Self { tensors, metadata })
    }

    /// Load only model weights from checkpoint
    pub fn load_weights<P: AsRef<Path>>(
        path: P,
        device: &Device,
    ) -> crate::Result<HashMap<String, Tensor>> {
        let checkpoint = Self::load(path, device)?;
        Ok(checkpoint.tensors)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Name of the directory holding one run's checkpoints
pub fn run_dir_name(timestamp: &DateTime<Local>, label: &str) -> String {
    format!("{}{}{}", timestamp.format(RUN_TIMESTAMP_FORMAT), label, RUN_DIR_SUFFIX)
}

/// File name of the checkpoint taken after `epoch`
pub fn checkpoint_file_name(epoch: usize) -> String {
    format!("model_epoch_{}.safetensors", epoch)
}

/// Writes per-epoch checkpoints into a run directory fixed at construction
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    run_dir: PathBuf,
}

impl CheckpointManager {
    /// Derive the run directory from the current local time and `label`
    pub fn new<P: AsRef<Path>>(root: P, label: &str) -> Self {
        let run_dir = root.as_ref().join(run_dir_name(&Local::now(), label));
        Self { run_dir }
    }

    /// Use an explicit run directory
    pub fn with_run_dir<P: Into<PathBuf>>(run_dir: P) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Path the checkpoint for `epoch` is written to
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.run_dir.join(checkpoint_file_name(epoch))
    }

    /// Save model parameters for the epoch recorded in `metadata`
    ///
    /// Creates the run directory (and parents) on first use. Any I/O failure
    /// is returned to the caller.
    pub fn save(
        &self,
        tensors: HashMap<String, Tensor>,
        metadata: CheckpointMetadata,
    ) -> crate::Result<PathBuf> {
        fs::create_dir_all(&self.run_dir)?;

        let path = self.checkpoint_path(metadata.epoch);
        Checkpoint::new(tensors, metadata).save(&path)?;

        log::info!("Checkpoint saved to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_tensors(device: &Device) -> crate::Result<HashMap<String, Tensor>> {
        let mut tensors = HashMap::new();
        tensors.insert(
            "input.weight".to_string(),
            Tensor::randn(0f32, 1.0, (4, 1, 3, 3, 3), device)?,
        );
        tensors.insert(
            "output.weight".to_string(),
            Tensor::ones((1, 4, 3, 3, 3), DType::F32, device)?,
        );
        Ok(tensors)
    }

    #[test]
    fn test_run_dir_name() {
        let ts = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(run_dir_name(&ts, "L_"), "0307-090502L__model");
    }

    #[test]
    fn test_checkpoint_file_name() {
        assert_eq!(checkpoint_file_name(12), "model_epoch_12.safetensors");
    }

    #[test]
    fn test_save_load_checkpoint() -> crate::Result<()> {
        let device = Device::Cpu;
        let dir = tempdir()?;
        let tensors = sample_tensors(&device)?;
        let metadata = CheckpointMetadata {
            epoch: 3,
            lr: 0.01,
            loss: Some(0.25),
            config: Some("{\"block_count\":2}".to_string()),
        };

        let path = dir.path().join("ckpt.safetensors");
        Checkpoint::new(tensors.clone(), metadata.clone()).save(&path)?;

        let loaded = Checkpoint::load(&path, &device)?;
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.tensors.len(), 2);

        for (name, original) in &tensors {
            let restored = &loaded.tensors[name];
            assert_eq!(restored.dims(), original.dims());
            let a = original.flatten_all()?.to_vec1::<f32>()?;
            let b = restored.flatten_all()?.to_vec1::<f32>()?;
            assert_eq!(a, b);
        }

        Ok(())
    }

    #[test]
    fn test_load_keeps_stored_dtype() -> crate::Result<()> {
        let device = Device::Cpu;
        let dir = tempdir()?;
        let mut tensors = HashMap::new();
        tensors.insert(
            "input.weight".to_string(),
            Tensor::new(&[0.5f64, -1.25, 3.0], &device)?,
        );

        let path = dir.path().join("f64.safetensors");
        Checkpoint::new(tensors, CheckpointMetadata::default()).save(&path)?;

        let loaded = Checkpoint::load(&path, &device)?;
        let restored = &loaded.tensors["input.weight"];
        assert_eq!(restored.dtype(), DType::F64);
        assert_eq!(restored.to_vec1::<f64>()?, vec![0.5, -1.25, 3.0]);
        Ok(())
    }

    #[test]
    fn test_failed_save_removes_temp_file() -> crate::Result<()> {
        let device = Device::Cpu;
        let dir = tempdir()?;
        // A non-empty directory occupies the target path, so the rename fails
        let path = dir.path().join("model_epoch_1.safetensors");
        fs::create_dir(&path)?;
        fs::write(path.join("keep"), b"x")?;

        let result = Checkpoint::new(sample_tensors(&device)?, CheckpointMetadata::default()).save(&path);
        assert!(matches!(result, Err(VdsrError::Io(_))));
        assert!(!dir.path().join("model_epoch_1.safetensors.tmp").exists());

        let entries: Vec<_> = fs::read_dir(dir.path())?.collect::<std::io::Result<_>>()?;
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[test]
    fn test_manager_creates_run_dir() -> crate::Result<()> {
        let device = Device::Cpu;
        let root = tempdir()?;
        let manager = CheckpointManager::new(root.path().join("nested").join("model"), "L_");

        let dir_name = manager.run_dir().file_name().unwrap().to_string_lossy().to_string();
        assert!(dir_name.ends_with("L__model"));
        assert!(!manager.run_dir().exists());

        let metadata = CheckpointMetadata {
            epoch: 1,
            ..Default::default()
        };
        let path = manager.save(sample_tensors(&device)?, metadata)?;

        assert_eq!(path, manager.checkpoint_path(1));
        assert!(path.exists());

        let entries: Vec<_> = fs::read_dir(manager.run_dir())?.collect::<std::io::Result<_>>()?;
        assert_eq!(entries.len(), 1, "temp file left behind");

        Ok(())
    }

    #[test]
    fn test_save_into_unwritable_location_fails() -> crate::Result<()> {
        let device = Device::Cpu;
        let root = tempdir()?;
        // A regular file where the run directory's parent should be
        let blocker = root.path().join("blocker");
        fs::write(&blocker, b"not a directory")?;

        let manager = CheckpointManager::with_run_dir(blocker.join("run"));
        let result = manager.save(sample_tensors(&device)?, CheckpointMetadata::default());
        assert!(matches!(result, Err(VdsrError::Io(_))));

        Ok(())
    }

    #[test]
    fn test_load_missing_metadata_fails() -> crate::Result<()> {
        let device = Device::Cpu;
        let dir = tempdir()?;
        let path = dir.path().join("plain.safetensors");
        candle_core::safetensors::save(&sample_tensors(&device)?, &path)?;

        assert!(matches!(
            Checkpoint::load(&path, &device),
            Err(VdsrError::Checkpoint(_))
        ));
        Ok(())
    }
}
