use candle::{Module, ModuleT, Result, Tensor};
use candle_nn::{
    BatchNorm, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig, Init, VarBuilder,
};

pub const KERNEL_SIZE: usize = 4;
pub const INIT_GAIN: f64 = 0.02;
pub const BN_EPS: f64 = 1e-5;
pub const BN_MOMENTUM: f64 = 0.1;

/// 4x4 convolution with weights drawn from `N(0, 0.02)`.
#[derive(Clone, Debug)]
pub struct ConvLayer {
    inner: Conv2d,
    pub(crate) weight: Tensor,
    pub(crate) bias: Option<Tensor>,
    pub(crate) stride: usize,
    pub(crate) padding: usize,
}

impl ConvLayer {
    pub fn new(
        in_c: usize,
        out_c: usize,
        stride: usize,
        padding: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_c, in_c, KERNEL_SIZE, KERNEL_SIZE),
            "weight",
            Init::Randn {
                mean: 0.,
                stdev: INIT_GAIN,
            },
        )?;
        let bias = if bias {
            Some(vb.get_with_hints(out_c, "bias", Init::Const(0.))?)
        } else {
            None
        };
        let cfg = Conv2dConfig {
            padding,
            stride,
            ..Default::default()
        };
        Ok(Self {
            inner: Conv2d::new(weight.clone(), bias.clone(), cfg),
            weight,
            bias,
            stride,
            padding,
        })
    }
}

impl Module for ConvLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.inner.forward(xs)
    }
}

/// 4x4 transposed convolution, weights laid out `(in, out, k, k)`.
#[derive(Clone, Debug)]
pub struct DeconvLayer {
    inner: ConvTranspose2d,
    pub(crate) weight: Tensor,
    pub(crate) bias: Option<Tensor>,
    pub(crate) stride: usize,
    pub(crate) padding: usize,
}

impl DeconvLayer {
    pub fn new(
        in_c: usize,
        out_c: usize,
        stride: usize,
        padding: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (in_c, out_c, KERNEL_SIZE, KERNEL_SIZE),
            "weight",
            Init::Randn {
                mean: 0.,
                stdev: INIT_GAIN,
            },
        )?;
        let bias = if bias {
            Some(vb.get_with_hints(out_c, "bias", Init::Const(0.))?)
        } else {
            None
        };
        let cfg = ConvTranspose2dConfig {
            padding,
            stride,
            ..Default::default()
        };
        Ok(Self {
            inner: ConvTranspose2d::new(weight.clone(), bias.clone(), cfg),
            weight,
            bias,
            stride,
            padding,
        })
    }
}

impl Module for DeconvLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.inner.forward(xs)
    }
}

/// Batch norm whose running statistics live in the var map, so they are
/// saved and restored with the weights.
#[derive(Clone, Debug)]
pub struct Norm {
    inner: BatchNorm,
    pub(crate) weight: Tensor,
    pub(crate) bias: Tensor,
    pub(crate) running_mean: Tensor,
    pub(crate) running_var: Tensor,
}

impl Norm {
    pub fn new(num_features: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            num_features,
            "weight",
            Init::Randn {
                mean: 1.,
                stdev: INIT_GAIN,
            },
        )?;
        let bias = vb.get_with_hints(num_features, "bias", Init::Const(0.))?;
        let running_mean = vb.get_with_hints(num_features, "running_mean", Init::Const(0.))?;
        let running_var = vb.get_with_hints(num_features, "running_var", Init::Const(1.))?;
        let inner = BatchNorm::new(
            num_features,
            running_mean.clone(),
            running_var.clone(),
            weight.clone(),
            bias.clone(),
            BN_EPS,
        )?;
        Ok(Self {
            inner,
            weight,
            bias,
            running_mean,
            running_var,
        })
    }
}

impl ModuleT for Norm {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.inner.forward_t(xs, train)
    }
}

/// Whether a var-map entry is a batch-norm statistic rather than a trainable weight.
pub fn is_running_stat(name: &str) -> bool {
    name.ends_with("running_mean") || name.ends_with("running_var")
}
