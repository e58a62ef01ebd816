//! U-Net generator.
//!
//! Block `i` halves the resolution on the way down and doubles it on the way
//! back up. Every block but the innermost concatenates its down-path features
//! with the output of the block below before upsampling, so the decoder sees
//! the encoder's detail at every scale. With `num_downs = 8` a 256x256 input
//! reaches a 1x1 bottleneck.

use super::layers::{ConvLayer, DeconvLayer, Norm};
use candle::{Module, ModuleT, Result, Tensor};
use candle_nn::{ops, Dropout, VarBuilder};
use serde::{Deserialize, Serialize};

pub const LEAKY_SLOPE: f64 = 0.2;
pub const DROPOUT: f32 = 0.5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnetGeneratorConfig {
    pub input_nc: usize,
    pub output_nc: usize,
    pub ngf: usize,
    pub num_downs: usize,
    pub use_dropout: bool,
}

impl Default for UnetGeneratorConfig {
    fn default() -> Self {
        Self {
            input_nc: 3,
            output_nc: 3,
            ngf: 64,
            num_downs: 8,
            use_dropout: true,
        }
    }
}

impl UnetGeneratorConfig {
    /// Channels produced by the down convolution of block `i`.
    pub fn inner_channels(&self, i: usize) -> usize {
        self.ngf << i.min(3)
    }

    /// Inputs must be a multiple of this in both spatial dimensions.
    pub fn size_multiple(&self) -> usize {
        1 << self.num_downs
    }
}

#[derive(Clone, Debug)]
pub(crate) struct UnetBlock {
    pub(crate) down: ConvLayer,
    pub(crate) down_norm: Option<Norm>,
    pub(crate) up: DeconvLayer,
    pub(crate) up_norm: Option<Norm>,
    pub(crate) dropout: bool,
}

#[derive(Clone, Debug)]
pub struct UnetGenerator {
    blocks: Vec<UnetBlock>,
    dropout: Dropout,
    config: UnetGeneratorConfig,
}

impl UnetGenerator {
    pub fn new(config: UnetGeneratorConfig, vb: VarBuilder) -> Result<Self> {
        let n = config.num_downs;
        if n < 2 {
            candle::bail!("a U-Net needs at least 2 downsampling blocks, got {n}")
        }
        let mut blocks = Vec::with_capacity(n);
        for i in 0..n {
            let innermost = i == n - 1;
            let inner = config.inner_channels(i);
            let (down_in, outer) = if i == 0 {
                (config.input_nc, config.output_nc)
            } else {
                let prev = config.inner_channels(i - 1);
                (prev, prev)
            };
            let up_in = if innermost { inner } else { inner * 2 };

            let down = ConvLayer::new(down_in, inner, 2, 1, false, vb.pp(format!("down{i}")))?;
            let down_norm = if i > 0 && !innermost {
                Some(Norm::new(inner, vb.pp(format!("down_norm{i}")))?)
            } else {
                None
            };
            let up = DeconvLayer::new(up_in, outer, 2, 1, i == 0, vb.pp(format!("up{i}")))?;
            let up_norm = if i > 0 {
                Some(Norm::new(outer, vb.pp(format!("up_norm{i}")))?)
            } else {
                None
            };
            blocks.push(UnetBlock {
                down,
                down_norm,
                up,
                up_norm,
                dropout: config.use_dropout && i >= 4 && !innermost,
            });
        }
        Ok(Self {
            blocks,
            dropout: Dropout::new(DROPOUT),
            config,
        })
    }

    pub fn config(&self) -> &UnetGeneratorConfig {
        &self.config
    }

    pub(crate) fn blocks(&self) -> &[UnetBlock] {
        &self.blocks
    }
}

impl ModuleT for UnetGenerator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (_, _, height, width) = xs.dims4()?;
        let m = self.config.size_multiple();
        if height % m != 0 || width % m != 0 {
            candle::bail!("input {height}x{width} is not a multiple of {m}")
        }

        let n = self.blocks.len();
        // Skips hold the activated down features, which also feed the next block.
        let mut skips = Vec::with_capacity(n);
        let mut h = xs.clone();
        for (i, block) in self.blocks.iter().enumerate() {
            h = block.down.forward(&h)?;
            if let Some(norm) = &block.down_norm {
                h = norm.forward_t(&h, train)?;
            }
            if i < n - 1 {
                h = ops::leaky_relu(&h, LEAKY_SLOPE)?;
            }
            skips.push(h.clone());
        }

        for (i, block) in self.blocks.iter().enumerate().rev() {
            let input = if i == n - 1 {
                h.clone()
            } else {
                Tensor::cat(&[&skips[i], &h], 1)?
            };
            let mut ys = block.up.forward(&input.relu()?)?;
            if let Some(norm) = &block.up_norm {
                ys = norm.forward_t(&ys, train)?;
            }
            if block.dropout {
                ys = self.dropout.forward_t(&ys, train)?;
            }
            h = if i == 0 { ys.tanh()? } else { ys };
        }
        Ok(h)
    }
}
