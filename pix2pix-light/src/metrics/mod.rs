//! Metrics for tracking translation quality.

use candle::{DType, Result, Tensor};

pub trait Metric {
    fn update(&mut self, preds: &Tensor, targets: &Tensor) -> Result<()>;
    fn compute(&self) -> f64;
    fn reset(&mut self);
}

fn mean_of(t: Tensor) -> Result<f64> {
    t.to_dtype(DType::F64)?.mean_all()?.to_scalar::<f64>()
}

/// Mean absolute error, averaged over every update.
#[derive(Clone, Debug, Default)]
pub struct MeanAbsoluteError {
    sum: f64,
    count: usize,
}

impl MeanAbsoluteError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for MeanAbsoluteError {
    fn update(&mut self, preds: &Tensor, targets: &Tensor) -> Result<()> {
        self.sum += mean_of(preds.sub(targets)?.abs()?)?;
        self.count += 1;
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Peak signal-to-noise ratio in dB for images in `[-1, 1]`.
///
/// Identical inputs are capped at [`Psnr::MAX_DB`] so the average stays finite.
#[derive(Clone, Debug, Default)]
pub struct Psnr {
    sum_db: f64,
    count: usize,
}

impl Psnr {
    pub const MAX_DB: f64 = 100.0;
    /// Width of the `[-1, 1]` value range.
    pub const PEAK_TO_PEAK: f64 = 2.0;

    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for Psnr {
    fn update(&mut self, preds: &Tensor, targets: &Tensor) -> Result<()> {
        let mse = mean_of(preds.sub(targets)?.sqr()?)?;
        let db = if mse <= 0.0 {
            Self::MAX_DB
        } else {
            (10.0 * (Self::PEAK_TO_PEAK * Self::PEAK_TO_PEAK / mse).log10()).min(Self::MAX_DB)
        };
        self.sum_db += db;
        self.count += 1;
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_db / self.count as f64
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::Device;

    #[test]
    fn mae_averages_updates() -> Result<()> {
        let dev = Device::Cpu;
        let zeros = Tensor::zeros((1, 3, 2, 2), DType::F32, &dev)?;
        let ones = Tensor::ones((1, 3, 2, 2), DType::F32, &dev)?;
        let mut mae = MeanAbsoluteError::new();
        mae.update(&zeros, &ones)?;
        mae.update(&zeros, &zeros)?;
        assert!((mae.compute() - 0.5).abs() < 1e-9);
        mae.reset();
        assert_eq!(mae.compute(), 0.0);
        Ok(())
    }

    #[test]
    fn psnr_of_known_error() -> Result<()> {
        let dev = Device::Cpu;
        let zeros = Tensor::zeros((3, 4, 4), DType::F32, &dev)?;
        let halves = Tensor::full(0.5f32, (3, 4, 4), &dev)?;
        let mut psnr = Psnr::new();
        psnr.update(&halves, &zeros)?;
        // mse = 0.25, peak = 2 -> 10 * log10(16)
        assert!((psnr.compute() - 10.0 * 16f64.log10()).abs() < 1e-6);

        psnr.reset();
        psnr.update(&zeros, &zeros)?;
        assert_eq!(psnr.compute(), Psnr::MAX_DB);
        Ok(())
    }
}
