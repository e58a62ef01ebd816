use candle::{Result, Tensor};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Adversarial objective.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GanMode {
    /// Binary cross-entropy on logits.
    #[default]
    Vanilla,
    /// Least squares.
    Lsgan,
}

impl FromStr for GanMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vanilla" => Ok(Self::Vanilla),
            "lsgan" => Ok(Self::Lsgan),
            other => Err(format!("unknown gan mode {other:?}, expected vanilla or lsgan")),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GanLoss {
    mode: GanMode,
    real_label: f64,
    fake_label: f64,
}

impl GanLoss {
    pub fn new(mode: GanMode) -> Self {
        Self {
            mode,
            real_label: 1.0,
            fake_label: 0.0,
        }
    }

    /// Loss of `prediction` against a target map filled with the real or fake label.
    pub fn loss(&self, prediction: &Tensor, target_is_real: bool) -> Result<Tensor> {
        let label = if target_is_real {
            self.real_label
        } else {
            self.fake_label
        };
        let target = prediction.ones_like()?.affine(label, 0.)?;
        match self.mode {
            GanMode::Vanilla => bce_with_logits(prediction, &target),
            GanMode::Lsgan => candle_nn::loss::mse(prediction, &target),
        }
    }
}

/// Numerically stable `mean(max(x, 0) - x * t + log(1 + exp(-|x|)))`.
pub fn bce_with_logits(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    let softplus = logits.abs()?.neg()?.exp()?.affine(1., 1.)?.log()?;
    logits
        .relu()?
        .sub(&logits.mul(target)?)?
        .add(&softplus)?
        .mean_all()
}

pub fn l1_loss(xs: &Tensor, target: &Tensor) -> Result<Tensor> {
    xs.sub(target)?.abs()?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::Device;

    #[test]
    fn bce_matches_closed_form() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[0f32, 2.0, -3.0], &dev)?;
        let loss = GanLoss::new(GanMode::Vanilla);

        let real = loss.loss(&logits, true)?.to_scalar::<f32>()?;
        let expected_real = [0f32, 2.0, -3.0]
            .iter()
            .map(|x| (1.0 + (-x).exp()).ln())
            .sum::<f32>()
            / 3.0;
        assert!((real - expected_real).abs() < 1e-5);

        let fake = loss.loss(&logits, false)?.to_scalar::<f32>()?;
        let expected_fake = [0f32, 2.0, -3.0]
            .iter()
            .map(|x| (1.0 + x.exp()).ln())
            .sum::<f32>()
            / 3.0;
        assert!((fake - expected_fake).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn lsgan_is_squared_distance_to_label() -> Result<()> {
        let dev = Device::Cpu;
        let preds = Tensor::new(&[0.5f32, 1.5], &dev)?;
        let loss = GanLoss::new(GanMode::Lsgan);
        assert!((loss.loss(&preds, true)?.to_scalar::<f32>()? - 0.25).abs() < 1e-6);
        assert!((loss.loss(&preds, false)?.to_scalar::<f32>()? - 1.25).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn parses_modes() {
        assert_eq!("LSGAN".parse::<GanMode>(), Ok(GanMode::Lsgan));
        assert!("wgan".parse::<GanMode>().is_err());
    }
}
