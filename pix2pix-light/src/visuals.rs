//! Turning model tensors back into images.

use candle::{DType, Device, Result, Tensor};
use image::RgbImage;
use std::path::Path;

/// Named images produced by a model step, kept in display order.
#[derive(Clone, Debug, Default)]
pub struct Visuals {
    entries: Vec<(String, Tensor)>,
}

impl Visuals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.entries.push((name.into(), tensor));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Convert a `(C, H, W)` or `(N, C, H, W)` tensor in `[-1, 1]` to an RGB
/// image. Only the first item of a batch is used and single-channel data is
/// repeated across the three channels.
pub fn tensor_to_image(t: &Tensor) -> Result<RgbImage> {
    let t = match t.rank() {
        4 => t.get(0)?,
        3 => t.clone(),
        r => candle::bail!("expected an image tensor of rank 3 or 4, got rank {r}"),
    };
    let t = t.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;
    let (c, h, w) = t.dims3()?;
    let t = match c {
        1 => Tensor::cat(&[&t, &t, &t], 0)?,
        3 => t,
        c => candle::bail!("cannot render a {c}-channel tensor as an image"),
    };
    let data = t
        .affine(127.5, 127.5)?
        .clamp(0f32, 255f32)?
        .permute((1, 2, 0))?
        .flatten_all()?
        .to_vec1::<f32>()?;
    // Truncate like an unsigned cast of the scaled values.
    let data = data.into_iter().map(|v| v as u8).collect();
    RgbImage::from_raw(w as u32, h as u32, data)
        .ok_or_else(|| candle::Error::Msg(format!("buffer does not fit a {w}x{h} image")))
}

/// Lay the visuals out left to right in a single image.
pub fn visuals_to_image(visuals: &Visuals) -> Result<RgbImage> {
    let images = visuals
        .entries
        .iter()
        .map(|(_, t)| tensor_to_image(t))
        .collect::<Result<Vec<_>>>()?;
    if images.is_empty() {
        candle::bail!("no visuals to render")
    }
    let width = images.iter().map(|i| i.width()).sum();
    let height = images.iter().map(|i| i.height()).max().unwrap_or(0);
    let mut canvas = RgbImage::new(width, height);
    let mut x = 0i64;
    for img in images.iter() {
        image::imageops::replace(&mut canvas, img, x, 0);
        x += img.width() as i64;
    }
    Ok(canvas)
}

/// Save the visuals side by side, the format follows the file extension.
pub fn save_visuals(visuals: &Visuals, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(candle::Error::wrap)?;
        }
    }
    visuals_to_image(visuals)?
        .save(path)
        .map_err(candle::Error::wrap)
}
