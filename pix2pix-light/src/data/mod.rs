//! Paired image datasets and batch iteration.

mod aligned;
mod loader;

pub use aligned::{AlignedDataset, DatasetOptions, PairedSample, TransformParams, IMG_EXTENSIONS};
pub use loader::{DataLoader, PairedBatch};

use candle::Result;

/// Anything the trainer can draw one epoch of batches from.
pub trait BatchSource {
    type Batch;

    /// Iterate over the batches of a single epoch.
    fn epoch_batches(&mut self) -> Result<Box<dyn Iterator<Item = Result<Self::Batch>> + '_>>;

    /// Configured batch size, counted for every batch including a short last
    /// one. `None` counts the samples each step reports instead.
    fn nominal_batch_size(&self) -> Option<usize> {
        None
    }
}

impl<B: Clone> BatchSource for Vec<B> {
    type Batch = B;

    fn epoch_batches(&mut self) -> Result<Box<dyn Iterator<Item = Result<B>> + '_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}
