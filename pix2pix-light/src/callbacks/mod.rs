//! Callback system for training hooks.

mod checkpoint;
mod scalar_logger;

pub use checkpoint::{ModelCheckpoint, LATEST_TAG};
pub use scalar_logger::{event_files, read_scalars, ScalarLogger, ScalarRecord};

use crate::{StepOutput, Trainer};
use candle::Result;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Number of batches in the epoch.
    pub steps: usize,
    pub mean_losses: BTreeMap<String, f32>,
    pub elapsed: Duration,
}

pub trait Callback<M>: Send {
    fn on_fit_start(&mut self, _trainer: &Trainer<M>, _model: &M) -> Result<()> {
        Ok(())
    }

    fn on_fit_end(&mut self, _trainer: &Trainer<M>, _model: &M) -> Result<()> {
        Ok(())
    }

    fn on_epoch_start(&mut self, _trainer: &Trainer<M>, _model: &M, _epoch: usize) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _trainer: &Trainer<M>,
        _model: &M,
        _epoch: usize,
        _metrics: &EpochMetrics,
    ) -> Result<()> {
        Ok(())
    }

    fn on_train_batch_end(
        &mut self,
        _trainer: &Trainer<M>,
        _model: &M,
        _batch_idx: usize,
        _output: &StepOutput,
    ) -> Result<()> {
        Ok(())
    }

    fn should_stop(&self) -> bool {
        false
    }
}
