//! Lightning-style GAN training for Candle, with a pix2pix model for paired
//! image-to-image translation.

pub mod callbacks;
pub mod config;
pub mod data;
pub mod export;
pub mod metrics;
pub mod model;
pub mod module;
pub mod nn;
pub mod trainer;
pub mod visuals;

pub use callbacks::{Callback, EpochMetrics, ModelCheckpoint, ScalarLogger};
pub use config::TrainerConfig;
pub use data::{AlignedDataset, BatchSource, DataLoader, DatasetOptions, PairedBatch};
pub use model::{Pix2PixConfig, Pix2PixModel};
pub use module::{Checkpoint, LightModule, StepOutput};
pub use trainer::Trainer;
pub use visuals::{save_visuals, Visuals};

pub use candle::{Module, ModuleT};
