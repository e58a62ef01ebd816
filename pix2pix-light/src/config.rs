//! Trainer configuration.

use candle::Device;

pub struct TrainerConfig {
    pub max_epochs: usize,
    pub device: Device,
    /// Print the current losses every `n` samples seen, `0` disables it.
    pub log_every_n_steps: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            device: Device::Cpu,
            log_every_n_steps: 100,
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn log_every_n_steps(mut self, n: usize) -> Self {
        self.log_every_n_steps = n;
        self
    }
}
