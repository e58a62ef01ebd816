use anyhow::Result;
use candle::{Device, Tensor, Var};
use candle_nn::{Linear, Module, Optimizer, SGD};
use pix2pix_light::callbacks::{event_files, read_scalars, LATEST_TAG};
use pix2pix_light::{
    Callback, Checkpoint, EpochMetrics, LightModule, ModelCheckpoint, ScalarLogger, StepOutput,
    Trainer, TrainerConfig,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
struct Batch {
    xs: Tensor,
    ys: Tensor,
}

struct LinearModel {
    linear: Linear,
    w: Var,
    b: Var,
    optimizer: SGD,
    lr_updates: usize,
}

impl LinearModel {
    fn new(device: &Device, lr: f64) -> Result<Self> {
        let w = Var::new(&[[0f32, 0.]], device)?;
        let b = Var::new(0f32, device)?;
        let linear = Linear::new(w.as_tensor().clone(), Some(b.as_tensor().clone()));
        let optimizer = SGD::new(vec![w.clone(), b.clone()], lr)?;
        Ok(Self {
            linear,
            w,
            b,
            optimizer,
            lr_updates: 0,
        })
    }
}

impl LightModule for LinearModel {
    type Batch = Batch;

    fn training_step(&mut self, batch: Batch, _batch_idx: usize) -> candle::Result<StepOutput> {
        let ys = self.linear.forward(&batch.xs)?;
        let loss = ys.sub(&batch.ys)?.sqr()?.sum_all()?;
        self.optimizer.backward_step(&loss)?;
        Ok(StepOutput::new(batch.xs.dim(0)?).with_loss("loss", loss.to_scalar::<f32>()?))
    }

    fn update_learning_rate(&mut self) -> candle::Result<()> {
        self.lr_updates += 1;
        Ok(())
    }
}

impl Checkpoint for LinearModel {
    fn save_networks(&self, dir: &Path, tag: &str) -> candle::Result<Vec<PathBuf>> {
        let path = dir.join(format!("{tag}_linear.safetensors"));
        let tensors = HashMap::from([
            ("w".to_string(), self.w.as_tensor().clone()),
            ("b".to_string(), self.b.as_tensor().clone()),
        ]);
        candle::safetensors::save(&tensors, &path)?;
        Ok(vec![path])
    }

    fn load_networks(&mut self, dir: &Path, tag: &str) -> candle::Result<()> {
        let path = dir.join(format!("{tag}_linear.safetensors"));
        let tensors = candle::safetensors::load(path, &Device::Cpu)?;
        self.w.set(&tensors["w"])?;
        self.b.set(&tensors["b"])?;
        Ok(())
    }
}

fn unit_batches(device: &Device) -> Result<Vec<Batch>> {
    Ok(vec![
        Batch {
            xs: Tensor::new(&[[1f32, 0.]], device)?,
            ys: Tensor::new(&[[1f32]], device)?,
        },
        Batch {
            xs: Tensor::new(&[[0f32, 1.]], device)?,
            ys: Tensor::new(&[[1f32]], device)?,
        },
    ])
}

#[test]
fn trainer_basic_training() -> Result<()> {
    let device = Device::Cpu;

    let w_gen = Tensor::new(&[[3f32, 1.]], &device)?;
    let b_gen = Tensor::new(-2f32, &device)?;
    let gen = Linear::new(w_gen, Some(b_gen));
    let sample_xs = Tensor::new(&[[2f32, 1.], [7., 4.], [-4., 12.], [5., 8.]], &device)?;
    let sample_ys = gen.forward(&sample_xs)?;

    let mut batches = vec![Batch {
        xs: sample_xs,
        ys: sample_ys,
    }];

    let mut model = LinearModel::new(&device, 0.004)?;

    let config = TrainerConfig::new().max_epochs(1000).log_every_n_steps(0);
    let mut trainer = Trainer::new(config);
    trainer.fit(&mut model, &mut batches)?;

    let w_vals = model.w.to_vec2::<f32>()?;
    let b_val = model.b.to_scalar::<f32>()?;

    assert!((w_vals[0][0] - 3.0).abs() < 0.01);
    assert!((w_vals[0][1] - 1.0).abs() < 0.01);
    assert!((b_val - (-2.0)).abs() < 0.03);

    // four samples per step
    assert_eq!(trainer.global_step(), 4000);
    assert_eq!(trainer.current_epoch(), Some(999));
    assert_eq!(model.lr_updates, 999);

    Ok(())
}

struct CountingCallback {
    epoch_starts: Arc<AtomicUsize>,
    epoch_ends: Arc<AtomicUsize>,
    batch_ends: Arc<AtomicUsize>,
}

impl<M: LightModule> Callback<M> for CountingCallback {
    fn on_epoch_start(
        &mut self,
        _trainer: &Trainer<M>,
        _model: &M,
        _epoch: usize,
    ) -> candle::Result<()> {
        self.epoch_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _trainer: &Trainer<M>,
        _model: &M,
        _epoch: usize,
        _metrics: &EpochMetrics,
    ) -> candle::Result<()> {
        self.epoch_ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_train_batch_end(
        &mut self,
        _trainer: &Trainer<M>,
        _model: &M,
        _batch_idx: usize,
        _output: &StepOutput,
    ) -> candle::Result<()> {
        self.batch_ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn trainer_callback_invocation() -> Result<()> {
    let device = Device::Cpu;
    let mut batches = unit_batches(&device)?;

    let epoch_starts = Arc::new(AtomicUsize::new(0));
    let epoch_ends = Arc::new(AtomicUsize::new(0));
    let batch_ends = Arc::new(AtomicUsize::new(0));

    let callback = CountingCallback {
        epoch_starts: epoch_starts.clone(),
        epoch_ends: epoch_ends.clone(),
        batch_ends: batch_ends.clone(),
    };

    let mut model = LinearModel::new(&device, 0.01)?;

    let config = TrainerConfig::new().max_epochs(5).log_every_n_steps(0);
    let mut trainer = Trainer::new(config).with_callback(callback);
    trainer.fit(&mut model, &mut batches)?;

    assert_eq!(epoch_starts.load(Ordering::SeqCst), 5);
    assert_eq!(epoch_ends.load(Ordering::SeqCst), 5);
    assert_eq!(batch_ends.load(Ordering::SeqCst), 10); // 2 batches * 5 epochs

    Ok(())
}

struct StopAfter {
    stop_at_epoch: usize,
    current_epoch: usize,
}

impl<M: LightModule> Callback<M> for StopAfter {
    fn on_epoch_end(
        &mut self,
        _trainer: &Trainer<M>,
        _model: &M,
        _epoch: usize,
        _metrics: &EpochMetrics,
    ) -> candle::Result<()> {
        self.current_epoch += 1;
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.current_epoch >= self.stop_at_epoch
    }
}

#[test]
fn trainer_stops_when_asked() -> Result<()> {
    let device = Device::Cpu;
    let mut batches = unit_batches(&device)?;

    let epoch_count = Arc::new(AtomicUsize::new(0));
    let counting = CountingCallback {
        epoch_starts: epoch_count.clone(),
        epoch_ends: Arc::new(AtomicUsize::new(0)),
        batch_ends: Arc::new(AtomicUsize::new(0)),
    };
    let stopper = StopAfter {
        stop_at_epoch: 3,
        current_epoch: 0,
    };

    let mut model = LinearModel::new(&device, 0.01)?;

    let config = TrainerConfig::new().max_epochs(100).log_every_n_steps(0);
    let mut trainer = Trainer::new(config)
        .with_callback(counting)
        .with_callback(stopper);
    trainer.fit(&mut model, &mut batches)?;

    assert_eq!(epoch_count.load(Ordering::SeqCst), 3);
    assert_eq!(trainer.current_epoch(), Some(2));

    Ok(())
}

#[test]
fn epoch_metrics_average_batch_losses() -> Result<()> {
    struct Recorder(Arc<std::sync::Mutex<Vec<EpochMetrics>>>);

    impl<M: LightModule> Callback<M> for Recorder {
        fn on_epoch_end(
            &mut self,
            _trainer: &Trainer<M>,
            _model: &M,
            _epoch: usize,
            metrics: &EpochMetrics,
        ) -> candle::Result<()> {
            self.0.lock().unwrap().push(metrics.clone());
            Ok(())
        }
    }

    let device = Device::Cpu;
    let mut batches = unit_batches(&device)?;
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    // lr 0 keeps both losses at 1.0
    let mut model = LinearModel::new(&device, 0.0)?;
    let mut trainer = Trainer::new(TrainerConfig::new().max_epochs(2).log_every_n_steps(1))
        .with_callback(Recorder(seen.clone()));
    trainer.fit(&mut model, &mut batches)?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].epoch, 1);
    assert_eq!(seen[1].steps, 2);
    assert!((seen[1].mean_losses["loss"] - 1.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn checkpoints_follow_epoch_cadence() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let device = Device::Cpu;
    let mut batches = unit_batches(&device)?;
    let mut model = LinearModel::new(&device, 0.01)?;

    let config = TrainerConfig::new().max_epochs(5).log_every_n_steps(0);
    let mut trainer =
        Trainer::new(config).with_callback(ModelCheckpoint::new(dir.path()).every_n_epochs(2));
    trainer.fit(&mut model, &mut batches)?;

    for epoch in [0, 2, 4] {
        assert!(dir.path().join(format!("{epoch}_linear.safetensors")).is_file());
    }
    for epoch in [1, 3] {
        assert!(!dir.path().join(format!("{epoch}_linear.safetensors")).exists());
    }

    // the latest checkpoint holds the final weights
    let mut restored = LinearModel::new(&device, 0.01)?;
    restored.load_networks(dir.path(), LATEST_TAG)?;
    assert_eq!(restored.w.to_vec2::<f32>()?, model.w.to_vec2::<f32>()?);
    assert_eq!(restored.b.to_scalar::<f32>()?, model.b.to_scalar::<f32>()?);
    Ok(())
}

#[test]
fn scalar_logger_writes_every_n_steps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let device = Device::Cpu;
    let mut batches = unit_batches(&device)?;
    let mut model = LinearModel::new(&device, 0.01)?;

    let config = TrainerConfig::new().max_epochs(3).log_every_n_steps(0);
    let mut trainer =
        Trainer::new(config).with_callback(ScalarLogger::new(dir.path()).every_n_steps(4));
    trainer.fit(&mut model, &mut batches)?;

    // six single-sample steps, logged at step 4 only
    let records = read_scalars(dir.path().join("scalars.jsonl"))?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tag, "loss");
    assert_eq!(records[0].step, 4);

    let events = event_files(dir.path())?;
    assert_eq!(events.len(), 1);
    assert!(std::fs::metadata(&events[0])?.len() > 0);
    Ok(())
}
