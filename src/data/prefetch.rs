/// Background batch preparation
///
/// Worker `w` of `W` assembles chunks `w, w + W, w + 2W, ...` of the pass
/// order and hands each one over through its own bounded channel. Reading the
/// channels round-robin yields the chunks in pass order, so prefetching never
/// changes which batches the consumer sees or in what order.
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::volume_dataset::{VolumeBatch, VolumePairDataset};
use crate::VdsrError;

/// Batches each worker may hold ready ahead of the consumer
const WORKER_QUEUE_DEPTH: usize = 1;

pub(crate) struct PrefetchBatches {
    receivers: Vec<Receiver<VolumeBatch>>,
    handles: Vec<JoinHandle<()>>,
    next_chunk: usize,
    chunk_count: usize,
}

impl PrefetchBatches {
    pub(crate) fn spawn(
        dataset: VolumePairDataset,
        order: Arc<Vec<usize>>,
        batch_size: usize,
        workers: usize,
    ) -> crate::Result<Self> {
        let workers = workers.max(1);
        let chunk_count = (order.len() + batch_size - 1) / batch_size;

        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, rx) = mpsc::sync_channel(WORKER_QUEUE_DEPTH);
            let dataset = dataset.clone();
            let order = Arc::clone(&order);

            let handle = thread::Builder::new()
                .name(format!("volume-prefetch-{}", worker))
                .spawn(move || {
                    for chunk in order.chunks(batch_size).skip(worker).step_by(workers) {
                        // Receiver gone: the pass was dropped early
                        if tx.send(dataset.assemble_batch(chunk)).is_err() {
                            return;
                        }
                    }
                })?;

            receivers.push(rx);
            handles.push(handle);
        }

        log::debug!("Spawned {} prefetch workers for {} batches", workers, chunk_count);

        Ok(Self {
            receivers,
            handles,
            next_chunk: 0,
            chunk_count,
        })
    }
}

impl Iterator for PrefetchBatches {
    type Item = crate::Result<VolumeBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_chunk >= self.chunk_count {
            return None;
        }

        let worker = self.next_chunk % self.receivers.len();
        match self.receivers[worker].recv() {
            Ok(batch) => {
                self.next_chunk += 1;
                Some(Ok(batch))
            }
            Err(_) => {
                let chunk = self.next_chunk;
                self.next_chunk = self.chunk_count;
                Some(Err(VdsrError::Training(format!(
                    "prefetch worker {} stopped before delivering batch {}",
                    worker, chunk
                ))))
            }
        }
    }
}

impl Drop for PrefetchBatches {
    fn drop(&mut self) {
        // Dropping the receivers unblocks workers waiting on a full channel
        self.receivers.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
