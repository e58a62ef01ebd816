//! Learning-rate schedules, stepped once per epoch.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrPolicy {
    /// Constant for `n_epochs`, then linear decay to zero over `n_epochs_decay`.
    #[default]
    Linear,
    /// Multiply by 0.1 every `lr_decay_iters` epochs.
    Step,
}

impl FromStr for LrPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "step" => Ok(Self::Step),
            other => Err(format!("unknown lr policy {other:?}, expected linear or step")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LrScheduler {
    policy: LrPolicy,
    base_lr: f64,
    n_epochs: usize,
    n_epochs_decay: usize,
    lr_decay_iters: usize,
    steps: usize,
}

impl LrScheduler {
    const STEP_GAMMA: f64 = 0.1;

    pub fn new(
        policy: LrPolicy,
        base_lr: f64,
        n_epochs: usize,
        n_epochs_decay: usize,
        lr_decay_iters: usize,
    ) -> Self {
        Self {
            policy,
            base_lr,
            n_epochs,
            n_epochs_decay,
            lr_decay_iters: lr_decay_iters.max(1),
            steps: 0,
        }
    }

    /// Multiplier applied to the base rate after `self.steps` updates.
    pub fn factor(&self) -> f64 {
        match self.policy {
            LrPolicy::Linear => {
                // Epoch numbering starts at 1.
                let over = (self.steps + 1).saturating_sub(self.n_epochs);
                1.0 - over as f64 / (self.n_epochs_decay + 1) as f64
            }
            LrPolicy::Step => Self::STEP_GAMMA.powi((self.steps / self.lr_decay_iters) as i32),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.base_lr * self.factor()
    }

    /// Advance by one epoch and return the new rate.
    pub fn step(&mut self) -> f64 {
        self.steps += 1;
        self.learning_rate()
    }
}
