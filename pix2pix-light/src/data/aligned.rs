//! Datasets of side-by-side `A|B` image pairs.
//!
//! Every file holds both domains concatenated horizontally: the left half is
//! `A`, the right half is `B`. Training samples are resized to `load_size`,
//! randomly cropped to `crop_size` and optionally flipped, with the same crop
//! and flip applied to both halves. Without augmentation, images are resized
//! straight to `crop_size`.

use candle::{DType, Device, Result, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;
use rand::Rng;
use std::path::{Path, PathBuf};

pub const IMG_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "ppm", "bmp", "tif", "tiff", "webp",
];

#[derive(Clone, Debug)]
pub struct DatasetOptions {
    pub load_size: u32,
    pub crop_size: u32,
    /// Random crop after resizing to `load_size`.
    pub augment: bool,
    /// Random horizontal flip, only applied when `augment` is set.
    pub flip: bool,
    pub input_nc: usize,
    pub output_nc: usize,
    pub max_dataset_size: Option<usize>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            load_size: 286,
            crop_size: 256,
            augment: true,
            flip: true,
            input_nc: 3,
            output_nc: 3,
            max_dataset_size: None,
        }
    }
}

impl DatasetOptions {
    /// Options for evaluation: deterministic resize, no flip.
    pub fn test(mut self) -> Self {
        self.augment = false;
        self.flip = false;
        self
    }
}

/// Per-sample augmentation, drawn once and shared by `A` and `B`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransformParams {
    pub crop_x: u32,
    pub crop_y: u32,
    pub flip: bool,
}

#[derive(Debug, Clone)]
pub struct PairedSample {
    /// `(C, H, W)` in `[-1, 1]`.
    pub a: Tensor,
    pub b: Tensor,
    pub path: PathBuf,
}

pub struct AlignedDataset {
    paths: Vec<PathBuf>,
    options: DatasetOptions,
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMG_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

impl AlignedDataset {
    /// Index the images under `dataroot/phase`.
    pub fn open(dataroot: impl AsRef<Path>, phase: &str, options: DatasetOptions) -> Result<Self> {
        let dir = dataroot.as_ref().join(phase);
        if !dir.is_dir() {
            candle::bail!("{} is not a valid directory", dir.display())
        }
        if options.crop_size == 0 || options.load_size < options.crop_size {
            candle::bail!(
                "load size {} must be at least the crop size {}",
                options.load_size,
                options.crop_size
            )
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(candle::Error::wrap)? {
            let path = entry.map_err(candle::Error::wrap)?.path();
            if path.is_file() && is_image_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        if let Some(max) = options.max_dataset_size {
            paths.truncate(max);
        }
        if paths.is_empty() {
            candle::bail!("found no images in {}", dir.display())
        }
        tracing::info!("dataset {} has {} images", dir.display(), paths.len());
        Ok(Self { paths, options })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Draw the augmentation for one sample.
    pub fn sample_params<R: Rng + ?Sized>(&self, rng: &mut R) -> TransformParams {
        if !self.options.augment {
            return TransformParams::default();
        }
        let slack = self.options.load_size - self.options.crop_size;
        TransformParams {
            crop_x: rng.random_range(0..=slack),
            crop_y: rng.random_range(0..=slack),
            flip: self.options.flip && rng.random_bool(0.5),
        }
    }

    /// Decode sample `index` with the given augmentation, on the CPU.
    pub fn load(&self, index: usize, params: TransformParams) -> Result<PairedSample> {
        let Some(path) = self.paths.get(index) else {
            candle::bail!("index {index} out of range for {} images", self.paths.len())
        };
        let ab = image::open(path).map_err(candle::Error::wrap)?;
        let (w, h) = (ab.width(), ab.height());
        if w < 2 {
            candle::bail!("{} is too narrow to hold an A|B pair", path.display())
        }
        let half = w / 2;
        let a = ab.crop_imm(0, 0, half, h);
        let b = ab.crop_imm(half, 0, half, h);

        let a = self.transform(&a, params);
        let b = self.transform(&b, params);
        Ok(PairedSample {
            a: image_to_tensor(&a, self.options.input_nc)?,
            b: image_to_tensor(&b, self.options.output_nc)?,
            path: path.clone(),
        })
    }

    fn transform(&self, img: &DynamicImage, params: TransformParams) -> DynamicImage {
        let (load_size, crop_size) = (self.options.load_size, self.options.crop_size);
        let img = if self.options.augment {
            img.resize_exact(load_size, load_size, FilterType::CatmullRom)
                .crop_imm(params.crop_x, params.crop_y, crop_size, crop_size)
        } else {
            img.resize_exact(crop_size, crop_size, FilterType::CatmullRom)
        };
        if params.flip {
            img.fliph()
        } else {
            img
        }
    }
}

/// Convert an image to a `(C, H, W)` f32 tensor normalized to `[-1, 1]`.
pub(crate) fn image_to_tensor(img: &DynamicImage, channels: usize) -> Result<Tensor> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let (raw, c) = match channels {
        1 => (img.to_luma8().into_raw(), 1),
        3 => (img.to_rgb8().into_raw(), 3),
        n => candle::bail!("unsupported channel count {n}, expected 1 or 3"),
    };
    Tensor::from_vec(raw, (h, w, c), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2.0 / 255.0, -1.0)
}
