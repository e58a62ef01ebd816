//! Networks and losses of the pix2pix model.

mod discriminator;
mod generator;
mod layers;
mod loss;

pub use discriminator::{PatchDiscriminator, PatchDiscriminatorConfig};
pub use generator::{UnetGenerator, UnetGeneratorConfig, DROPOUT, LEAKY_SLOPE};
pub use layers::{
    is_running_stat, ConvLayer, DeconvLayer, Norm, BN_EPS, BN_MOMENTUM, KERNEL_SIZE,
};
pub use loss::{bce_with_logits, l1_loss, GanLoss, GanMode};
