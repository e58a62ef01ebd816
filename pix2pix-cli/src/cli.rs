//! Command line surface. Every flag defaults to the values of the reference
//! facades run, so `pix2pix run` reproduces it without arguments.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pix2pix_light::model::{Direction, LrPolicy};
use pix2pix_light::nn::{GanMode, PatchDiscriminatorConfig, UnetGeneratorConfig};
use pix2pix_light::{DatasetOptions, Pix2PixConfig};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pix2pix",
    version,
    about = "Train, test and export a pix2pix image-to-image translation model."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train on `<dataroot>/train`, checkpointing as configured
    Train(RunArgs),
    /// Translate the first samples of `<dataroot>/test` with a saved checkpoint
    Test(RunArgs),
    /// Write the generator of a saved checkpoint as an ONNX model
    Export(RunArgs),
    /// Train, then test, then export
    Run(RunArgs),
}

#[derive(Args, Debug, Clone, Serialize)]
pub struct RunArgs {
    /// Name of the run, used for every output directory
    #[arg(long, default_value = "pix2pix_run_1")]
    pub name: String,

    /// Directory holding `train` and `test` folders of A|B images
    #[arg(long, default_value = "facades/AB")]
    pub dataroot: PathBuf,

    #[arg(long, default_value = "checkpoints")]
    pub checkpoints_dir: PathBuf,

    /// Root of the scalar logs
    #[arg(long, default_value = "runs")]
    pub runs_dir: PathBuf,

    /// Root of checkpoint and test images
    #[arg(long, default_value = "test")]
    pub results_dir: PathBuf,

    #[arg(long, default_value = "exported")]
    pub export_dir: PathBuf,

    /// Total epochs, the second half decays the learning rate; must be even
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Samples between progress lines
    #[arg(long, default_value_t = 100)]
    pub print_freq: usize,

    /// Samples between scalar log entries
    #[arg(long, default_value_t = 100)]
    pub log_freq: usize,

    /// Epochs between checkpoints
    #[arg(long, default_value_t = 2)]
    pub ckpt_freq: usize,

    /// Number of test images to translate
    #[arg(long, default_value_t = 5)]
    pub test_sample: usize,

    #[arg(long)]
    pub no_logs: bool,

    #[arg(long)]
    pub no_ckpts: bool,

    /// Skip the images saved with each checkpoint
    #[arg(long)]
    pub no_img_ckpt: bool,

    /// Checkpoint tag loaded by `test` and `export`
    #[arg(long, default_value = "latest")]
    pub load_tag: String,

    /// Run on the CPU even if a GPU is available
    #[arg(long)]
    pub cpu: bool,

    #[arg(long)]
    pub shuffle: bool,

    /// Seed of the data augmentation
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long, default_value = "AtoB")]
    pub direction: Direction,

    #[arg(long, default_value = "vanilla")]
    pub gan_mode: GanMode,

    #[arg(long, default_value = "linear")]
    pub lr_policy: LrPolicy,

    #[arg(long, default_value_t = 2e-4)]
    pub lr: f64,

    #[arg(long, default_value_t = 0.5)]
    pub beta1: f64,

    #[arg(long, default_value_t = 100.0)]
    pub lambda_l1: f64,

    #[arg(long, default_value_t = 50)]
    pub lr_decay_iters: usize,

    #[arg(long, default_value_t = 286)]
    pub load_size: u32,

    #[arg(long, default_value_t = 256)]
    pub crop_size: u32,

    #[arg(long, default_value_t = 3)]
    pub input_nc: usize,

    #[arg(long, default_value_t = 3)]
    pub output_nc: usize,

    #[arg(long, default_value_t = 64)]
    pub ngf: usize,

    #[arg(long, default_value_t = 64)]
    pub ndf: usize,

    /// Downsampling blocks of the U-Net, 8 for 256x256 images
    #[arg(long, default_value_t = 8)]
    pub num_downs: usize,

    #[arg(long, default_value_t = 3)]
    pub n_layers_d: usize,

    #[arg(long)]
    pub no_dropout: bool,

    #[arg(long)]
    pub max_dataset_size: Option<usize>,
}

impl RunArgs {
    pub fn ckpt_dir(&self) -> PathBuf {
        self.checkpoints_dir.join(&self.name)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.runs_dir.join(&self.name)
    }

    pub fn test_dir(&self) -> PathBuf {
        self.results_dir.join(&self.name)
    }

    pub fn export_path(&self) -> PathBuf {
        self.export_dir.join(format!("{}.onnx", self.name))
    }

    pub fn model_config(&self) -> Result<Pix2PixConfig> {
        let config = Pix2PixConfig {
            generator: UnetGeneratorConfig {
                input_nc: self.input_nc,
                output_nc: self.output_nc,
                ngf: self.ngf,
                num_downs: self.num_downs,
                use_dropout: !self.no_dropout,
            },
            discriminator: PatchDiscriminatorConfig {
                input_nc: self.input_nc + self.output_nc,
                ndf: self.ndf,
                n_layers: self.n_layers_d,
            },
            gan_mode: self.gan_mode,
            lambda_l1: self.lambda_l1,
            lr: self.lr,
            beta1: self.beta1,
            lr_policy: self.lr_policy,
            lr_decay_iters: self.lr_decay_iters,
            direction: self.direction,
            ..Default::default()
        };
        Ok(config.with_total_epochs(self.epochs)?)
    }

    pub fn dataset_options(&self) -> DatasetOptions {
        // Channels as seen by the dataset, before the model applies the direction.
        let (a_nc, b_nc) = match self.direction {
            Direction::AtoB => (self.input_nc, self.output_nc),
            Direction::BtoA => (self.output_nc, self.input_nc),
        };
        DatasetOptions {
            load_size: self.load_size,
            crop_size: self.crop_size,
            augment: true,
            flip: true,
            input_nc: a_nc,
            output_nc: b_nc,
            max_dataset_size: self.max_dataset_size,
        }
    }
}
