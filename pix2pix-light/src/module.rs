//! LightModule trait for trainable models.

use crate::visuals::Visuals;
use candle::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Output from a training step.
#[derive(Clone, Debug, Default)]
pub struct StepOutput {
    /// Named scalar losses, ordered by name.
    pub losses: BTreeMap<String, f32>,
    /// Number of samples consumed by the step.
    pub batch_size: usize,
}

impl StepOutput {
    pub fn new(batch_size: usize) -> Self {
        Self {
            losses: BTreeMap::new(),
            batch_size,
        }
    }

    pub fn with_loss(mut self, name: impl Into<String>, value: f32) -> Self {
        self.losses.insert(name.into(), value);
        self
    }

    pub fn loss(&self, name: &str) -> Option<f32> {
        self.losses.get(name).copied()
    }
}

/// Trait for models that can be trained with [`Trainer`](crate::Trainer).
///
/// A module owns its optimizers: a GAN steps two of them per batch, so the
/// trainer only drives the loop and leaves parameter updates to the module.
pub trait LightModule {
    type Batch;

    /// Feed a batch through the model and update its parameters.
    fn training_step(&mut self, batch: Self::Batch, batch_idx: usize) -> Result<StepOutput>;

    /// Advance the learning-rate schedule, called at the start of every
    /// epoch but the first.
    fn update_learning_rate(&mut self) -> Result<()> {
        Ok(())
    }

    /// One-line rendering of a step's losses for the progress log.
    fn describe_losses(&self, output: &StepOutput) -> String {
        output
            .losses
            .iter()
            .map(|(name, value)| format!("{name}: {value:.3}"))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Models whose weights can be written to and restored from disk.
pub trait Checkpoint {
    /// Write every network under `dir`, file names prefixed by `tag`.
    fn save_networks(&self, dir: &Path, tag: &str) -> Result<Vec<PathBuf>>;

    /// Restore every network from the files written for `tag`.
    fn load_networks(&mut self, dir: &Path, tag: &str) -> Result<()>;

    /// Images describing the latest step, if the model keeps any.
    fn current_visuals(&self) -> Result<Option<Visuals>> {
        Ok(None)
    }
}
