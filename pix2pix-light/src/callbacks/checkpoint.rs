//! Model checkpointing callback.

use super::{Callback, EpochMetrics};
use crate::module::{Checkpoint, LightModule};
use crate::trainer::is_due;
use crate::visuals::save_visuals;
use crate::Trainer;
use candle::Result;
use std::path::PathBuf;

/// Tag that always points at the most recent checkpoint.
pub const LATEST_TAG: &str = "latest";

/// Saves the model every `every_n_epochs` epochs, counted from epoch 0, and
/// once more when training ends.
pub struct ModelCheckpoint {
    dirpath: PathBuf,
    every_n_epochs: usize,
    image_dir: Option<PathBuf>,
}

impl ModelCheckpoint {
    pub fn new(dirpath: impl Into<PathBuf>) -> Self {
        Self {
            dirpath: dirpath.into(),
            every_n_epochs: 1,
            image_dir: None,
        }
    }

    pub fn every_n_epochs(mut self, n: usize) -> Self {
        self.every_n_epochs = n;
        self
    }

    /// Also write the model's current visuals as `epoch_{n}.jpg` under `dir`.
    pub fn with_images(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(dir.into());
        self
    }

    fn save<M: Checkpoint>(&self, model: &M, epoch: usize) -> Result<()> {
        std::fs::create_dir_all(&self.dirpath).map_err(candle::Error::wrap)?;

        let tag = epoch.to_string();
        for path in model.save_networks(&self.dirpath, &tag)? {
            tracing::debug!("wrote {}", path.display());
        }
        model.save_networks(&self.dirpath, LATEST_TAG)?;

        if let Some(dir) = &self.image_dir {
            if let Some(visuals) = model.current_visuals()? {
                std::fs::create_dir_all(dir).map_err(candle::Error::wrap)?;
                let path = dir.join(format!("epoch_{epoch}.jpg"));
                tracing::info!("Saving epoch {epoch} visuals to {}", path.display());
                save_visuals(&visuals, &path)?;
            }
        }
        Ok(())
    }
}

impl<M: LightModule + Checkpoint> Callback<M> for ModelCheckpoint {
    fn on_epoch_end(
        &mut self,
        trainer: &Trainer<M>,
        model: &M,
        epoch: usize,
        _metrics: &EpochMetrics,
    ) -> Result<()> {
        if !is_due(epoch, self.every_n_epochs) {
            return Ok(());
        }
        tracing::info!(
            "Saving the model at the end of epoch {}, iters {}",
            epoch,
            trainer.global_step()
        );
        self.save(model, epoch)
    }

    fn on_fit_end(&mut self, trainer: &Trainer<M>, model: &M) -> Result<()> {
        let Some(epoch) = trainer.current_epoch() else {
            return Ok(());
        };
        tracing::info!("Saving the model at the end of training");
        self.save(model, epoch)
    }
}
