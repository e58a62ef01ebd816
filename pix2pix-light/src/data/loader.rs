//! Batching over an [`AlignedDataset`].

use super::{AlignedDataset, BatchSource, TransformParams};
use candle::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PairedBatch {
    /// `(N, C, H, W)` images from domain `A`.
    pub a: Tensor,
    /// `(N, C, H, W)` images from domain `B`.
    pub b: Tensor,
    pub paths: Vec<PathBuf>,
}

impl PairedBatch {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Yields batches in dataset order unless shuffling is on. Augmentation is
/// drawn from a seeded generator before decoding, so runs are reproducible
/// even though samples are decoded in parallel.
pub struct DataLoader {
    dataset: AlignedDataset,
    batch_size: usize,
    shuffle: bool,
    device: Device,
    rng: StdRng,
}

impl DataLoader {
    pub fn new(dataset: AlignedDataset, batch_size: usize, device: &Device) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle: false,
            device: device.clone(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn dataset(&self) -> &AlignedDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per epoch, the last one may be short.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn plan_epoch(&mut self) -> Vec<Vec<(usize, TransformParams)>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let mut plan = Vec::with_capacity(order.len().div_ceil(self.batch_size));
        for chunk in order.chunks(self.batch_size) {
            let mut batch = Vec::with_capacity(chunk.len());
            for &idx in chunk {
                batch.push((idx, self.dataset.sample_params(&mut self.rng)));
            }
            plan.push(batch);
        }
        plan
    }

    fn load_batch(&self, plan: &[(usize, TransformParams)]) -> Result<PairedBatch> {
        let samples = plan
            .par_iter()
            .map(|&(idx, params)| self.dataset.load(idx, params))
            .collect::<Result<Vec<_>>>()?;
        let a = samples.iter().map(|s| &s.a).collect::<Vec<_>>();
        let b = samples.iter().map(|s| &s.b).collect::<Vec<_>>();
        Ok(PairedBatch {
            a: Tensor::stack(&a, 0)?.to_device(&self.device)?,
            b: Tensor::stack(&b, 0)?.to_device(&self.device)?,
            paths: samples.iter().map(|s| s.path.clone()).collect(),
        })
    }
}

impl BatchSource for DataLoader {
    type Batch = PairedBatch;

    fn epoch_batches(&mut self) -> Result<Box<dyn Iterator<Item = Result<PairedBatch>> + '_>> {
        let plan = self.plan_epoch();
        let this = &*self;
        Ok(Box::new(plan.into_iter().map(move |chunk| this.load_batch(&chunk))))
    }

    fn nominal_batch_size(&self) -> Option<usize> {
        Some(self.batch_size)
    }
}
