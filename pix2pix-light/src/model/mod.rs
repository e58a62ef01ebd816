//! Conditional GAN translating paired images from domain `A` to domain `B`.
//!
//! The generator learns `A -> B`; the discriminator sees `(A, B)` pairs
//! concatenated on the channel axis and judges whether `B` is real or produced
//! by the generator. The generator objective adds an L1 term pulling its output
//! towards the ground truth.

mod scheduler;

pub use scheduler::{LrPolicy, LrScheduler};

use crate::data::PairedBatch;
use crate::module::{Checkpoint, LightModule, StepOutput};
use crate::nn::{
    is_running_stat, l1_loss, GanLoss, GanMode, PatchDiscriminator, PatchDiscriminatorConfig,
    UnetGenerator, UnetGeneratorConfig,
};
use crate::visuals::Visuals;
use candle::{DType, Device, ModuleT, Result, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const LOSS_NAMES: [&str; 4] = ["G_GAN", "G_L1", "D_real", "D_fake"];
pub const VISUAL_NAMES: [&str; 3] = ["real_A", "fake_B", "real_B"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    AtoB,
    BtoA,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atob" => Ok(Self::AtoB),
            "btoa" => Ok(Self::BtoA),
            other => Err(format!("unknown direction {other:?}, expected AtoB or BtoA")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pix2PixConfig {
    pub generator: UnetGeneratorConfig,
    pub discriminator: PatchDiscriminatorConfig,
    pub gan_mode: GanMode,
    pub lambda_l1: f64,
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub lr_policy: LrPolicy,
    /// Epochs at the initial learning rate.
    pub n_epochs: usize,
    /// Epochs of linear decay after `n_epochs`.
    pub n_epochs_decay: usize,
    pub lr_decay_iters: usize,
    pub direction: Direction,
}

impl Default for Pix2PixConfig {
    fn default() -> Self {
        Self {
            generator: UnetGeneratorConfig::default(),
            discriminator: PatchDiscriminatorConfig::default(),
            gan_mode: GanMode::Vanilla,
            lambda_l1: 100.0,
            lr: 2e-4,
            beta1: 0.5,
            beta2: 0.999,
            lr_policy: LrPolicy::Linear,
            n_epochs: 100,
            n_epochs_decay: 100,
            lr_decay_iters: 50,
            direction: Direction::AtoB,
        }
    }
}

impl Pix2PixConfig {
    /// Split `epochs` into a constant half and a decaying half.
    pub fn with_total_epochs(mut self, epochs: usize) -> Result<Self> {
        if epochs % 2 != 0 {
            candle::bail!("the number of epochs must be even, got {epochs}")
        }
        self.n_epochs = epochs / 2;
        self.n_epochs_decay = epochs / 2;
        Ok(self)
    }

    fn discriminator_config(&self) -> PatchDiscriminatorConfig {
        PatchDiscriminatorConfig {
            input_nc: self.generator.input_nc + self.generator.output_nc,
            ..self.discriminator.clone()
        }
    }
}

/// Everything only needed while training.
struct TrainState {
    net_d: PatchDiscriminator,
    vars_d: VarMap,
    opt_g: AdamW,
    opt_d: AdamW,
    gan_loss: GanLoss,
    scheduler: LrScheduler,
}

struct Current {
    real_a: Tensor,
    real_b: Tensor,
    fake_b: Option<Tensor>,
    paths: Vec<PathBuf>,
}

pub struct Pix2PixModel {
    config: Pix2PixConfig,
    device: Device,
    net_g: UnetGenerator,
    vars_g: VarMap,
    train_state: Option<TrainState>,
    training: bool,
    current: Option<Current>,
    losses: BTreeMap<String, f32>,
}

fn trainable_vars(varmap: &VarMap) -> Vec<Var> {
    let data = varmap.data().lock().unwrap_or_else(|e| e.into_inner());
    let mut named: Vec<_> = data
        .iter()
        .filter(|(name, _)| !is_running_stat(name))
        .collect();
    named.sort_by(|a, b| a.0.cmp(b.0));
    named.into_iter().map(|(_, var)| var.clone()).collect()
}

/// Number of trainable scalars in a var map.
pub fn num_parameters(varmap: &VarMap) -> usize {
    trainable_vars(varmap).iter().map(|v| v.elem_count()).sum()
}

fn network_file(dir: &Path, tag: &str, net: &str) -> PathBuf {
    dir.join(format!("{tag}_net_{net}.safetensors"))
}

impl Pix2PixModel {
    pub fn new(config: Pix2PixConfig, device: &Device, is_train: bool) -> Result<Self> {
        let vars_g = VarMap::new();
        let vb = VarBuilder::from_varmap(&vars_g, DType::F32, device);
        let net_g = UnetGenerator::new(config.generator.clone(), vb.pp("net_G"))?;
        tracing::info!(
            "[Network G] Total number of parameters : {:.3} M",
            num_parameters(&vars_g) as f64 / 1e6
        );

        let train_state = if is_train {
            let vars_d = VarMap::new();
            let vb = VarBuilder::from_varmap(&vars_d, DType::F32, device);
            let net_d = PatchDiscriminator::new(&config.discriminator_config(), vb.pp("net_D"))?;
            tracing::info!(
                "[Network D] Total number of parameters : {:.3} M",
                num_parameters(&vars_d) as f64 / 1e6
            );
            let params = ParamsAdamW {
                lr: config.lr,
                beta1: config.beta1,
                beta2: config.beta2,
                eps: 1e-8,
                weight_decay: 0.0,
            };
            Some(TrainState {
                opt_g: AdamW::new(trainable_vars(&vars_g), params.clone())?,
                opt_d: AdamW::new(trainable_vars(&vars_d), params)?,
                net_d,
                vars_d,
                gan_loss: GanLoss::new(config.gan_mode),
                scheduler: LrScheduler::new(
                    config.lr_policy,
                    config.lr,
                    config.n_epochs,
                    config.n_epochs_decay,
                    config.lr_decay_iters,
                ),
            })
        } else {
            None
        };

        Ok(Self {
            config,
            device: device.clone(),
            net_g,
            vars_g,
            train_state,
            training: is_train,
            current: None,
            losses: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &Pix2PixConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn generator(&self) -> &UnetGenerator {
        &self.net_g
    }

    pub fn generator_vars(&self) -> &VarMap {
        &self.vars_g
    }

    /// Switch batch norm and dropout to inference behavior.
    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Current rate of the generator optimizer, `None` outside training.
    pub fn learning_rate(&self) -> Option<f64> {
        self.train_state.as_ref().map(|s| s.opt_g.learning_rate())
    }

    pub fn set_input(&mut self, batch: &PairedBatch) -> Result<()> {
        let (a, b) = match self.config.direction {
            Direction::AtoB => (&batch.a, &batch.b),
            Direction::BtoA => (&batch.b, &batch.a),
        };
        self.current = Some(Current {
            real_a: a.to_device(&self.device)?,
            real_b: b.to_device(&self.device)?,
            fake_b: None,
            paths: batch.paths.clone(),
        });
        Ok(())
    }

    /// Paths of the images behind the current input.
    pub fn image_paths(&self) -> &[PathBuf] {
        self.current.as_ref().map(|c| c.paths.as_slice()).unwrap_or(&[])
    }

    fn current_mut(&mut self) -> Result<&mut Current> {
        match self.current.as_mut() {
            Some(c) => Ok(c),
            None => candle::bail!("no input set, call set_input first"),
        }
    }

    pub fn forward(&mut self) -> Result<Tensor> {
        let training = self.training;
        let net_g = &self.net_g;
        let current = match self.current.as_mut() {
            Some(c) => c,
            None => candle::bail!("no input set, call set_input first"),
        };
        let fake_b = net_g.forward_t(&current.real_a, training)?;
        current.fake_b = Some(fake_b.clone());
        Ok(fake_b)
    }

    /// Forward pass whose result is cut from the autodiff graph.
    pub fn test(&mut self) -> Result<Tensor> {
        let fake_b = self.forward()?.detach();
        self.current_mut()?.fake_b = Some(fake_b.clone());
        Ok(fake_b)
    }

    /// One discriminator update followed by one generator update.
    pub fn optimize_parameters(&mut self) -> Result<()> {
        let fake_b = self.forward()?;
        let lambda_l1 = self.config.lambda_l1;
        let training = self.training;
        let (real_a, real_b) = match &self.current {
            Some(c) => (c.real_a.clone(), c.real_b.clone()),
            None => candle::bail!("no input set, call set_input first"),
        };
        let Some(state) = self.train_state.as_mut() else {
            candle::bail!("the model was built for inference only")
        };

        let fake_ab = Tensor::cat(&[&real_a, &fake_b.detach()], 1)?;
        let pred_fake = state.net_d.forward_t(&fake_ab, training)?;
        let loss_d_fake = state.gan_loss.loss(&pred_fake, false)?;
        let real_ab = Tensor::cat(&[&real_a, &real_b], 1)?;
        let pred_real = state.net_d.forward_t(&real_ab, training)?;
        let loss_d_real = state.gan_loss.loss(&pred_real, true)?;
        let loss_d = loss_d_fake.add(&loss_d_real)?.affine(0.5, 0.)?;
        state.opt_d.backward_step(&loss_d)?;

        let fake_ab = Tensor::cat(&[&real_a, &fake_b], 1)?;
        let pred_fake = state.net_d.forward_t(&fake_ab, training)?;
        let loss_g_gan = state.gan_loss.loss(&pred_fake, true)?;
        let loss_g_l1 = l1_loss(&fake_b, &real_b)?.affine(lambda_l1, 0.)?;
        let loss_g = loss_g_gan.add(&loss_g_l1)?;
        state.opt_g.backward_step(&loss_g)?;

        let scalar = |t: &Tensor| t.to_dtype(DType::F32)?.to_scalar::<f32>();
        self.losses = BTreeMap::from([
            ("G_GAN".to_string(), scalar(&loss_g_gan)?),
            ("G_L1".to_string(), scalar(&loss_g_l1)?),
            ("D_real".to_string(), scalar(&loss_d_real)?),
            ("D_fake".to_string(), scalar(&loss_d_fake)?),
        ]);
        Ok(())
    }

    pub fn current_losses(&self) -> &BTreeMap<String, f32> {
        &self.losses
    }

    pub fn visuals(&self) -> Result<Visuals> {
        let Some(current) = &self.current else {
            candle::bail!("no input set, call set_input first")
        };
        let Some(fake_b) = &current.fake_b else {
            candle::bail!("no output yet, run forward or test first")
        };
        Ok(Visuals::new()
            .with(VISUAL_NAMES[0], current.real_a.clone())
            .with(VISUAL_NAMES[1], fake_b.clone())
            .with(VISUAL_NAMES[2], current.real_b.clone()))
    }

    /// Advance the schedule of both optimizers by one epoch.
    pub fn update_learning_rate(&mut self) -> Result<f64> {
        let Some(state) = self.train_state.as_mut() else {
            candle::bail!("the model was built for inference only")
        };
        let old_lr = state.opt_g.learning_rate();
        let lr = state.scheduler.step();
        state.opt_g.set_learning_rate(lr);
        state.opt_d.set_learning_rate(lr);
        tracing::info!("learning rate {old_lr:.7} -> {lr:.7}");
        Ok(lr)
    }
}

impl LightModule for Pix2PixModel {
    type Batch = PairedBatch;

    fn training_step(&mut self, batch: PairedBatch, _batch_idx: usize) -> Result<StepOutput> {
        self.train();
        self.set_input(&batch)?;
        self.optimize_parameters()?;
        let mut output = StepOutput::new(batch.len());
        output.losses = self.losses.clone();
        Ok(output)
    }

    fn update_learning_rate(&mut self) -> Result<()> {
        Pix2PixModel::update_learning_rate(self).map(|_| ())
    }

    fn describe_losses(&self, output: &StepOutput) -> String {
        let get = |name: &str| output.loss(name).unwrap_or(f32::NAN);
        format!(
            "GAN Loss: {:.3} | Gen. L1: {:.3} | Disc. real: {:.3} | Disc. fake: {:.3}",
            get("G_GAN"),
            get("G_L1"),
            get("D_real"),
            get("D_fake")
        )
    }
}

impl Checkpoint for Pix2PixModel {
    fn save_networks(&self, dir: &Path, tag: &str) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(candle::Error::wrap)?;
        let mut written = Vec::with_capacity(2);
        let path = network_file(dir, tag, "G");
        self.vars_g.save(&path)?;
        written.push(path);
        if let Some(state) = &self.train_state {
            let path = network_file(dir, tag, "D");
            state.vars_d.save(&path)?;
            written.push(path);
        }
        Ok(written)
    }

    fn load_networks(&mut self, dir: &Path, tag: &str) -> Result<()> {
        let path = network_file(dir, tag, "G");
        if !path.is_file() {
            candle::bail!("checkpoint {} does not exist", path.display())
        }
        tracing::info!("loading the model from {}", path.display());
        self.vars_g.load(&path)?;
        if let Some(state) = self.train_state.as_mut() {
            let path = network_file(dir, tag, "D");
            if !path.is_file() {
                candle::bail!("checkpoint {} does not exist", path.display())
            }
            tracing::info!("loading the model from {}", path.display());
            state.vars_d.load(&path)?;
        }
        Ok(())
    }

    fn current_visuals(&self) -> Result<Option<Visuals>> {
        match &self.current {
            Some(Current {
                fake_b: Some(_), ..
            }) => self.visuals().map(Some),
            _ => Ok(None),
        }
    }
}
