//! PatchGAN discriminator: classifies overlapping patches as real or fake.
//!
//! With three strided layers each output logit sees a 70x70 receptive field;
//! a 256x256 input yields a 30x30 map of logits.

use super::generator::LEAKY_SLOPE;
use super::layers::{ConvLayer, Norm};
use candle::{Module, ModuleT, Result, Tensor};
use candle_nn::{ops, VarBuilder};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchDiscriminatorConfig {
    /// Channels of the conditioning image plus the translated image.
    pub input_nc: usize,
    pub ndf: usize,
    pub n_layers: usize,
}

impl Default for PatchDiscriminatorConfig {
    fn default() -> Self {
        Self {
            input_nc: 6,
            ndf: 64,
            n_layers: 3,
        }
    }
}

#[derive(Clone, Debug)]
struct DiscBlock {
    conv: ConvLayer,
    norm: Option<Norm>,
    activate: bool,
}

#[derive(Clone, Debug)]
pub struct PatchDiscriminator {
    blocks: Vec<DiscBlock>,
}

impl PatchDiscriminator {
    pub fn new(config: &PatchDiscriminatorConfig, vb: VarBuilder) -> Result<Self> {
        let ndf = config.ndf;
        let mut blocks = vec![DiscBlock {
            conv: ConvLayer::new(config.input_nc, ndf, 2, 1, true, vb.pp("conv0"))?,
            norm: None,
            activate: true,
        }];

        let mut mult = 1;
        for n in 1..=config.n_layers {
            let prev = mult;
            mult = 1 << n.min(3);
            // The last hidden layer keeps the resolution.
            let stride = if n == config.n_layers { 1 } else { 2 };
            blocks.push(DiscBlock {
                conv: ConvLayer::new(
                    ndf * prev,
                    ndf * mult,
                    stride,
                    1,
                    false,
                    vb.pp(format!("conv{n}")),
                )?,
                norm: Some(Norm::new(ndf * mult, vb.pp(format!("norm{n}")))?),
                activate: true,
            });
        }

        let last = config.n_layers + 1;
        blocks.push(DiscBlock {
            conv: ConvLayer::new(ndf * mult, 1, 1, 1, true, vb.pp(format!("conv{last}")))?,
            norm: None,
            activate: false,
        });
        Ok(Self { blocks })
    }
}

impl ModuleT for PatchDiscriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in self.blocks.iter() {
            xs = block.conv.forward(&xs)?;
            if let Some(norm) = &block.norm {
                xs = norm.forward_t(&xs, train)?;
            }
            if block.activate {
                xs = ops::leaky_relu(&xs, LEAKY_SLOPE)?;
            }
        }
        Ok(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn patch_map_shape() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let cfg = PatchDiscriminatorConfig {
            ndf: 4,
            ..Default::default()
        };
        let d = PatchDiscriminator::new(&cfg, vb)?;
        let xs = Tensor::randn(0f32, 1., (2, 6, 64, 64), &dev)?;
        // 64 -> 32 -> 16 -> 8 -> 7 -> 6
        assert_eq!(d.forward_t(&xs, true)?.dims(), &[2, 1, 6, 6]);
        Ok(())
    }
}
