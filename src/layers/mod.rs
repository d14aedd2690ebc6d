/// Neural network layer primitives
///
/// The network is built from a single primitive:
/// - Bias-free 3x3x3 convolution with fan-out initialization

pub mod conv3d;

pub use conv3d::{Conv3d, fan_out_std, KERNEL_SIZE, KERNEL_VOLUME};
