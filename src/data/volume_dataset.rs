/// Paired low/high resolution volumes loaded from a NumPy `.npz` container
use candle_core::{Device, Tensor};
use ndarray::{Array3, Array4, Axis};
use ndarray_npy::NpzReader;
use rand::seq::SliceRandom;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use super::prefetch::PrefetchBatches;
use crate::VdsrError;

/// Name of the low-resolution collection inside the container
pub const INPUTS_KEY: &str = "inputs";

/// Name of the high-resolution collection inside the container
pub const TARGETS_KEY: &str = "targets";

/// Read one named 4-D collection, accepting NumPy's `<name>.npy` entry naming
///
/// A missing entry and an entry that cannot be decoded as `f32` (for example
/// NumPy's default `float64`) are reported separately.
fn read_collection<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> crate::Result<Array4<f32>> {
    let entries = npz
        .names()
        .map_err(|e| VdsrError::DataFormat(format!("cannot list container entries: {}", e)))?;

    let npy_name = format!("{}.npy", name);
    let entry = match entries.iter().find(|e| e.as_str() == name || *e == &npy_name) {
        Some(entry) => entry.clone(),
        None => {
            return Err(VdsrError::DataFormat(format!(
                "collection '{}' is missing (entries: {:?})",
                name, entries
            )))
        }
    };

    let first: Result<Array4<f32>, _> = npz.by_name(&entry);
    let first_err = match first {
        Ok(array) => return Ok(array),
        Err(e) => e,
    };

    // Some readers list `<name>.npy` entries without their suffix
    let detail = if entry == name {
        let fallback: Result<Array4<f32>, _> = npz.by_name(&npy_name);
        match fallback {
            Ok(array) => return Ok(array),
            Err(e) => format!("{} ('{}': {})", first_err, npy_name, e),
        }
    } else {
        first_err.to_string()
    };

    Err(VdsrError::DataFormat(format!(
        "collection '{}' could not be read as a 4-D f32 array: {}",
        name, detail
    )))
}

/// Dataset of (input, target) volume pairs, each [D, H, W]
///
/// Cloning is cheap; the volumes are shared.
#[derive(Debug, Clone)]
pub struct VolumePairDataset {
    inputs: Arc<Array4<f32>>,  // [N, D, H, W]
    targets: Arc<Array4<f32>>, // [N, D, H, W]
}

impl VolumePairDataset {
    /// Load from an `.npz` file holding `inputs` and `targets` arrays
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        log::info!("Loading volume pairs from: {:?}", path);

        if !path.is_file() {
            return Err(VdsrError::DataFormat(format!(
                "dataset file {:?} does not exist",
                path
            )));
        }

        let file = File::open(path)?;
        let mut npz = NpzReader::new(BufReader::new(file)).map_err(|e| {
            VdsrError::DataFormat(format!("{:?} is not a readable .npz container: {}", path, e))
        })?;

        let inputs = read_collection(&mut npz, INPUTS_KEY)?;
        let targets = read_collection(&mut npz, TARGETS_KEY)?;

        let dataset = Self::from_arrays(inputs, targets)?;

        let (d, h, w) = dataset.volume_shape();
        log::info!(
            "Dataset loaded: {} volume pairs of {}x{}x{}",
            dataset.len(),
            d,
            h,
            w
        );

        Ok(dataset)
    }

    /// Build from in-memory arrays of shape [N, D, H, W]
    pub fn from_arrays(inputs: Array4<f32>, targets: Array4<f32>) -> crate::Result<Self> {
        let (n_inputs, n_targets) = (inputs.len_of(Axis(0)), targets.len_of(Axis(0)));
        if n_inputs != n_targets {
            return Err(VdsrError::DataFormat(format!(
                "length mismatch: {} inputs vs {} targets",
                n_inputs, n_targets
            )));
        }

        if inputs.shape()[1..] != targets.shape()[1..] {
            return Err(VdsrError::DataFormat(format!(
                "volume shape mismatch: inputs {:?} vs targets {:?}",
                &inputs.shape()[1..],
                &targets.shape()[1..]
            )));
        }

        if n_inputs == 0 {
            return Err(VdsrError::DataFormat("dataset contains no samples".to_string()));
        }

        if inputs.shape()[1..].contains(&0) {
            return Err(VdsrError::DataFormat(format!(
                "volumes have an empty axis: {:?}",
                &inputs.shape()[1..]
            )));
        }

        Ok(Self {
            inputs: Arc::new(inputs),
            targets: Arc::new(targets),
        })
    }

    /// Get number of volume pairs
    pub fn len(&self) -> usize {
        self.inputs.len_of(Axis(0))
    }

    /// Check if empty (never true for a successfully built dataset)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spatial shape (D, H, W) shared by every volume
    pub fn volume_shape(&self) -> (usize, usize, usize) {
        let shape = self.inputs.shape();
        (shape[1], shape[2], shape[3])
    }

    /// Get the pair at `index`
    pub fn get(&self, index: usize) -> crate::Result<(Array3<f32>, Array3<f32>)> {
        if index >= self.len() {
            return Err(VdsrError::Index {
                index,
                len: self.len(),
            });
        }
        Ok((
            self.inputs.index_axis(Axis(0), index).to_owned(),
            self.targets.index_axis(Axis(0), index).to_owned(),
        ))
    }

    /// Stack the pairs at `indices` into one host batch
    ///
    /// Indices come from a pass order over `0..len` and are always in range.
    pub(crate) fn assemble_batch(&self, indices: &[usize]) -> VolumeBatch {
        let (d, h, w) = self.volume_shape();
        let voxels = d * h * w;

        let mut inputs = Vec::with_capacity(indices.len() * voxels);
        let mut targets = Vec::with_capacity(indices.len() * voxels);
        for &idx in indices {
            inputs.extend(self.inputs.index_axis(Axis(0), idx).iter().copied());
            targets.extend(self.targets.index_axis(Axis(0), idx).iter().copied());
        }

        VolumeBatch {
            indices: indices.to_vec(),
            inputs,
            targets,
            volume_shape: (d, h, w),
        }
    }

    /// Iterate over one full pass in batches
    ///
    /// # Arguments
    /// * `batch_size` - Pairs per batch; the last batch may be smaller
    /// * `shuffle` - Draw a fresh random order for this pass
    /// * `worker_count` - Background workers preparing batches ahead (0 or 1: none)
    pub fn iterate(
        &self,
        batch_size: usize,
        shuffle: bool,
        worker_count: usize,
    ) -> crate::Result<VolumeBatches> {
        if batch_size == 0 {
            return Err(VdsrError::Config("batch_size must be > 0".to_string()));
        }

        let mut order: Vec<usize> = (0..self.len()).collect();
        if shuffle {
            let mut rng = rand::thread_rng();
            order.shuffle(&mut rng);
        }

        let backend = if worker_count <= 1 {
            BatchBackend::Immediate {
                dataset: self.clone(),
                order,
                batch_size,
                position: 0,
            }
        } else {
            BatchBackend::Prefetch(PrefetchBatches::spawn(
                self.clone(),
                Arc::new(order),
                batch_size,
                worker_count,
            )?)
        };

        Ok(VolumeBatches { backend })
    }
}

/// Host-side batch of volume pairs
#[derive(Debug, Clone)]
pub struct VolumeBatch {
    /// Dataset indices of the pairs, in batch order
    pub indices: Vec<usize>,
    /// Input voxels, row-major [len, D, H, W]
    pub inputs: Vec<f32>,
    /// Target voxels, row-major [len, D, H, W]
    pub targets: Vec<f32>,
    /// (D, H, W)
    pub volume_shape: (usize, usize, usize),
}

impl VolumeBatch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Convert to (input, target) tensors of shape [len, 1, D, H, W]
    pub fn to_tensors(&self, device: &Device) -> crate::Result<(Tensor, Tensor)> {
        let (d, h, w) = self.volume_shape;
        let shape = (self.len(), 1, d, h, w);
        let inputs = Tensor::from_slice(self.inputs.as_slice(), shape, device)?;
        let targets = Tensor::from_slice(self.targets.as_slice(), shape, device)?;
        Ok((inputs, targets))
    }
}

enum BatchBackend {
    Immediate {
        dataset: VolumePairDataset,
        order: Vec<usize>,
        batch_size: usize,
        position: usize,
    },
    Prefetch(PrefetchBatches),
}

/// Iterator over the batches of one pass
pub struct VolumeBatches {
    backend: BatchBackend,
}

impl Iterator for VolumeBatches {
    type Item = crate::Result<VolumeBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.backend {
            BatchBackend::Immediate {
                dataset,
                order,
                batch_size,
                position,
            } => {
                if *position >= order.len() {
                    return None;
                }
                let end = (*position + *batch_size).min(order.len());
                let batch = dataset.assemble_batch(&order[*position..end]);
                *position = end;
                Some(Ok(batch))
            }
            BatchBackend::Prefetch(batches) => batches.next(),
        }
    }
}

/// Data loader for volume pair datasets
pub struct VolumeDataLoader {
    dataset: VolumePairDataset,
    batch_size: usize,
    shuffle: bool,
    num_workers: usize,
    pass: Option<VolumeBatches>,
}

impl VolumeDataLoader {
    /// Create new data loader
    pub fn new(
        dataset: VolumePairDataset,
        batch_size: usize,
        shuffle: bool,
        num_workers: usize,
    ) -> crate::Result<Self> {
        if batch_size == 0 {
            return Err(VdsrError::Config("batch_size must be > 0".to_string()));
        }

        Ok(Self {
            dataset,
            batch_size,
            shuffle,
            num_workers,
            pass: None,
        })
    }

    /// Next host batch of the current pass, starting a pass if none is active
    pub fn next_host_batch(&mut self) -> crate::Result<Option<VolumeBatch>> {
        if self.pass.is_none() {
            self.pass = Some(self.dataset.iterate(self.batch_size, self.shuffle, self.num_workers)?);
        }

        match self.pass.as_mut().and_then(|pass| pass.next()) {
            Some(batch) => Ok(Some(batch?)),
            None => Ok(None),
        }
    }

    /// Get number of batches
    pub fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    /// Get dataset reference
    pub fn dataset(&self) -> &VolumePairDataset {
        &self.dataset
    }
}

impl super::BatchDataLoader for VolumeDataLoader {
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<(Tensor, Tensor)>> {
        match self.next_host_batch()? {
            Some(batch) => Ok(Some(batch.to_tensors(device)?)),
            None => Ok(None),
        }
    }

    fn reset(&mut self) {
        // The next call starts a fresh pass with a new order
        self.pass = None;
    }

    fn num_batches(&self) -> usize {
        VolumeDataLoader::num_batches(self)
    }
}
