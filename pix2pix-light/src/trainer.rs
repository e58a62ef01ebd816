//! Training loop implementation.

use crate::callbacks::EpochMetrics;
use crate::data::BatchSource;
use crate::{Callback, LightModule, StepOutput, TrainerConfig};
use candle::Result;
use std::collections::BTreeMap;
use std::time::Instant;

pub struct Trainer<M> {
    config: TrainerConfig,
    callbacks: Vec<Box<dyn Callback<M>>>,
    global_step: usize,
    current_epoch: Option<usize>,
}

impl<M: LightModule> Trainer<M> {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            callbacks: Vec::new(),
            global_step: 0,
            current_epoch: None,
        }
    }

    pub fn with_callback(mut self, callback: impl Callback<M> + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Number of samples seen since the start of `fit`.
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// The epoch currently running, or the last one that ran once `fit` returns.
    pub fn current_epoch(&self) -> Option<usize> {
        self.current_epoch
    }

    pub fn fit<D>(&mut self, model: &mut M, train_data: &mut D) -> Result<()>
    where
        D: BatchSource<Batch = M::Batch>,
    {
        // Callbacks receive `&Trainer`, so they are moved out for the duration of the loop.
        let mut callbacks = std::mem::take(&mut self.callbacks);
        let res = self.run(&mut callbacks, model, train_data);
        self.callbacks = callbacks;
        res
    }

    fn run<D>(
        &mut self,
        callbacks: &mut [Box<dyn Callback<M>>],
        model: &mut M,
        train_data: &mut D,
    ) -> Result<()>
    where
        D: BatchSource<Batch = M::Batch>,
    {
        self.global_step = 0;
        self.current_epoch = None;
        for cb in callbacks.iter_mut() {
            cb.on_fit_start(self, model)?;
        }

        let max_epochs = self.config.max_epochs;
        let nominal_batch_size = train_data.nominal_batch_size();
        for epoch in 0..max_epochs {
            let epoch_start = Instant::now();
            self.current_epoch = Some(epoch);
            for cb in callbacks.iter_mut() {
                cb.on_epoch_start(self, model, epoch)?;
            }
            if epoch != 0 {
                model.update_learning_rate()?;
            }

            let mut sums: BTreeMap<String, f64> = BTreeMap::new();
            let mut steps = 0usize;
            for (batch_idx, batch) in train_data.epoch_batches()?.enumerate() {
                let output = model.training_step(batch?, batch_idx)?;
                self.global_step += nominal_batch_size.unwrap_or(output.batch_size);
                steps += 1;
                for (name, value) in output.losses.iter() {
                    *sums.entry(name.clone()).or_default() += *value as f64;
                }
                self.log_step(model, epoch, &output);
                for cb in callbacks.iter_mut() {
                    cb.on_train_batch_end(self, model, batch_idx, &output)?;
                }
            }

            let metrics = EpochMetrics {
                epoch,
                steps,
                mean_losses: sums
                    .into_iter()
                    .map(|(name, sum)| (name, (sum / steps.max(1) as f64) as f32))
                    .collect(),
                elapsed: epoch_start.elapsed(),
            };
            for cb in callbacks.iter_mut() {
                cb.on_epoch_end(self, model, epoch, &metrics)?;
            }
            tracing::info!(
                "End of epoch {} / {} \t Time Taken: {} secs",
                epoch,
                max_epochs,
                metrics.elapsed.as_secs()
            );

            if callbacks.iter().any(|cb| cb.should_stop()) {
                tracing::info!("stop requested by a callback after epoch {epoch}");
                break;
            }
        }

        for cb in callbacks.iter_mut() {
            cb.on_fit_end(self, model)?;
        }
        Ok(())
    }

    fn log_step(&self, model: &M, epoch: usize, output: &StepOutput) {
        if !is_due(self.global_step, self.config.log_every_n_steps) {
            return;
        }
        let line = progress_line(self.global_step, epoch, &model.describe_losses(output));
        tracing::info!("{line}");
    }
}

/// Whether something running every `every` steps fires at `step`; `0` never fires.
pub fn is_due(step: usize, every: usize) -> bool {
    every != 0 && step % every == 0
}

/// The progress line printed during training.
pub fn progress_line(step: usize, epoch: usize, losses: &str) -> String {
    format!("Step {step} | Epoch {epoch} | {losses}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_on_multiples_only() {
        let due = (1..=10).filter(|&s| is_due(s, 4)).collect::<Vec<_>>();
        assert_eq!(due, vec![4, 8]);
        assert!((1..=10).all(|s| is_due(s, 1)));
        assert!(!(0..=10).any(|s| is_due(s, 0)));
    }

    #[test]
    fn progress_line_layout() {
        assert_eq!(progress_line(300, 2, "loss: 0.125"), "Step 300 | Epoch 2 | loss: 0.125");
    }
}
