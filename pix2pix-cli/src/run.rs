use crate::cli::RunArgs;
use anyhow::{Context, Result};
use candle::Device;
use pix2pix_light::export::{export_generator, ExportSummary};
use pix2pix_light::metrics::{MeanAbsoluteError, Metric, Psnr};
use pix2pix_light::{
    save_visuals, AlignedDataset, BatchSource, Checkpoint, DataLoader, ModelCheckpoint,
    Pix2PixModel, ScalarLogger, Trainer, TrainerConfig,
};
use std::path::Path;

pub const RUN_CONFIG_FILE: &str = "run_config.json";
pub const FINAL_VISUALS: &str = "final.jpg";

pub fn device(args: &RunArgs) -> Result<Device> {
    if args.cpu {
        Ok(Device::Cpu)
    } else {
        Ok(Device::cuda_if_available(0)?)
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))
}

pub fn train(args: &RunArgs, device: &Device) -> Result<Pix2PixModel> {
    let config = args.model_config()?;
    let ckpt_dir = args.ckpt_dir();
    let test_dir = args.test_dir();
    create_dir(&test_dir)?;
    if !args.no_ckpts {
        create_dir(&ckpt_dir)?;
        let json = serde_json::to_string_pretty(args)?;
        std::fs::write(ckpt_dir.join(RUN_CONFIG_FILE), json)?;
    }
    if !args.no_logs {
        create_dir(&args.log_dir())?;
    }

    let trainer_config = TrainerConfig::new()
        .max_epochs(args.epochs)
        .device(device.clone())
        .log_every_n_steps(args.print_freq);
    let dataset = AlignedDataset::open(&args.dataroot, "train", args.dataset_options())?;
    let mut loader = DataLoader::new(dataset, args.batch_size, &trainer_config.device)
        .shuffle(args.shuffle)
        .seed(args.seed);
    tracing::info!("The number of training images = {}", loader.dataset().len());

    let mut model = Pix2PixModel::new(config, device, true)?;
    let mut trainer = Trainer::new(trainer_config);
    if !args.no_ckpts {
        let mut checkpoint = ModelCheckpoint::new(&ckpt_dir).every_n_epochs(args.ckpt_freq);
        if !args.no_img_ckpt {
            checkpoint = checkpoint.with_images(&test_dir);
        }
        trainer = trainer.with_callback(checkpoint);
    }
    if !args.no_logs {
        let logger = ScalarLogger::new(args.log_dir()).every_n_steps(args.log_freq);
        trainer = trainer.with_callback(logger);
    }
    trainer.fit(&mut model, &mut loader)?;

    if let Some(visuals) = model.current_visuals()? {
        let path = test_dir.join(FINAL_VISUALS);
        save_visuals(&visuals, &path)?;
        tracing::info!("final visuals written to {}", path.display());
    }
    Ok(model)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub samples: usize,
    pub mae: f64,
    pub psnr: f64,
}

pub fn test(args: &RunArgs, device: &Device) -> Result<TestReport> {
    let test_dir = args.test_dir();
    create_dir(&test_dir)?;

    let dataset = AlignedDataset::open(&args.dataroot, "test", args.dataset_options().test())?;
    let mut loader = DataLoader::new(dataset, 1, device);

    let mut model = Pix2PixModel::new(args.model_config()?, device, false)?;
    model.eval();
    model
        .load_networks(&args.ckpt_dir(), &args.load_tag)
        .with_context(|| format!("loading checkpoint {:?} of {}", args.load_tag, args.name))?;

    let mut mae = MeanAbsoluteError::new();
    let mut psnr = Psnr::new();
    let mut samples = 0;
    for (i, batch) in loader.epoch_batches()?.take(args.test_sample).enumerate() {
        let batch = batch?;
        model.set_input(&batch)?;
        let fake_b = model.test()?;
        let visuals = model.visuals()?;
        if let Some(real_b) = visuals.get("real_B") {
            mae.update(&fake_b, real_b)?;
            psnr.update(&fake_b, real_b)?;
        }
        save_visuals(&visuals, test_dir.join(format!("test_{i}.jpg")))?;
        tracing::info!("processing ({i:04})-th image... {:?}", model.image_paths());
        samples += 1;
    }

    let report = TestReport {
        samples,
        mae: mae.compute(),
        psnr: psnr.compute(),
    };
    tracing::info!(
        "tested {} images: MAE {:.4}, PSNR {:.2} dB",
        report.samples,
        report.mae,
        report.psnr
    );
    Ok(report)
}

pub fn export(args: &RunArgs, device: &Device) -> Result<ExportSummary> {
    let mut model = Pix2PixModel::new(args.model_config()?, device, false)?;
    model.eval();
    model
        .load_networks(&args.ckpt_dir(), &args.load_tag)
        .with_context(|| format!("loading checkpoint {:?} of {}", args.load_tag, args.name))?;
    let size = args.crop_size as usize;
    let input_shape = [1, model.config().generator.input_nc, size, size];
    Ok(export_generator(&model, &input_shape, args.export_path())?)
}
