use anyhow::Result;
use candle::{Device, ModuleT};
use pix2pix_light::export::export_generator;
use pix2pix_light::nn::{PatchDiscriminatorConfig, UnetGeneratorConfig};
use pix2pix_light::{PairedBatch, Pix2PixConfig, Pix2PixModel};
use tract_onnx::prelude::*;

fn trained_generator(device: &Device) -> Result<Pix2PixModel> {
    let config = Pix2PixConfig {
        generator: UnetGeneratorConfig {
            ngf: 4,
            num_downs: 5,
            ..Default::default()
        },
        discriminator: PatchDiscriminatorConfig {
            ndf: 4,
            ..Default::default()
        },
        n_epochs: 1,
        n_epochs_decay: 1,
        ..Default::default()
    };
    let mut model = Pix2PixModel::new(config, device, true)?;
    // a few updates move the batch norm running statistics away from 0 / 1
    for _ in 0..3 {
        let batch = PairedBatch {
            a: candle::Tensor::randn(0f32, 1., (1, 3, 32, 32), device)?,
            b: candle::Tensor::randn(0f32, 1., (1, 3, 32, 32), device)?,
            paths: vec!["x.png".into()],
        };
        model.set_input(&batch)?;
        model.optimize_parameters()?;
    }
    model.eval();
    Ok(model)
}

#[test]
fn exported_generator_matches_candle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let device = Device::Cpu;
    let model = trained_generator(&device)?;
    let path = dir.path().join("net_G.onnx");
    export_generator(&model, &[1, 3, 32, 32], &path)?;

    let x = candle::Tensor::randn(0f32, 1., (1, 3, 32, 32), &device)?;
    let expected = model
        .generator()
        .forward_t(&x, false)?
        .flatten_all()?
        .to_vec1::<f32>()?;

    let runnable = tract_onnx::onnx()
        .model_for_path(&path)?
        .into_optimized()?
        .into_runnable()?;
    let input = tract_ndarray::Array4::from_shape_vec(
        (1, 3, 32, 32),
        x.flatten_all()?.to_vec1::<f32>()?,
    )?
    .into_tensor();
    let outputs = runnable.run(tvec!(input.into()))?;
    let got = outputs[0].to_array_view::<f32>()?;
    assert_eq!(got.shape(), &[1, 3, 32, 32]);

    let max_diff = got
        .iter()
        .zip(expected.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0f32, f32::max);
    assert!(max_diff < 1e-4, "max difference {max_diff}");
    Ok(())
}
