/// Bias-free 3D convolution built on candle's 2D convolution
///
/// candle has no native 3D convolution, so the kernel is applied one depth
/// tap at a time: each tap's 3x3 slice is convolved over a depth-shifted view
/// of the input with depth folded into the batch axis, and the partial
/// results are summed. Every step is differentiable through candle's autograd.
use candle_core::{Module, Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Spatial extent of the kernel along each axis
pub const KERNEL_SIZE: usize = 3;

/// Number of weights per (out, in) channel pair
pub const KERNEL_VOLUME: usize = KERNEL_SIZE * KERNEL_SIZE * KERNEL_SIZE;

/// Zero padding applied on every side; keeps D, H and W unchanged
const PADDING: usize = 1;

/// Standard deviation of the fan-out initialization for a layer
///
/// Weights are drawn from N(0, 2 / (kernel_volume * out_channels)).
pub fn fan_out_std(out_channels: usize) -> f64 {
    (2.0 / (KERNEL_VOLUME * out_channels) as f64).sqrt()
}

/// 3x3x3 convolution, stride 1, padding 1, no bias
#[derive(Debug, Clone)]
pub struct Conv3d {
    /// Kernel of shape [out_channels, in_channels, 3, 3, 3]
    weight: Tensor,
    in_channels: usize,
    out_channels: usize,
}

impl Conv3d {
    /// Create a new layer, drawing its weight with the fan-out scheme
    ///
    /// # Arguments
    /// * `in_channels` - Input channel count
    /// * `out_channels` - Output channel count
    /// * `vb` - VarBuilder for parameter initialization (weight stored as `weight`)
    pub fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        let init = Init::Randn {
            mean: 0.0,
            stdev: fan_out_std(out_channels),
        };
        let weight = vb.get_with_hints(
            (out_channels, in_channels, KERNEL_SIZE, KERNEL_SIZE, KERNEL_SIZE),
            "weight",
            init,
        )?;

        Ok(Self {
            weight,
            in_channels,
            out_channels,
        })
    }

    /// Wrap an existing kernel tensor
    pub fn from_weight(weight: Tensor) -> Result<Self> {
        let (out_channels, in_channels, kd, kh, kw) = weight.dims5()?;
        if (kd, kh, kw) != (KERNEL_SIZE, KERNEL_SIZE, KERNEL_SIZE) {
            candle_core::bail!(
                "expected a {}x{}x{} kernel, got {}x{}x{}",
                KERNEL_SIZE,
                KERNEL_SIZE,
                KERNEL_SIZE,
                kd,
                kh,
                kw
            );
        }
        Ok(Self {
            weight,
            in_channels,
            out_channels,
        })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl Module for Conv3d {
    /// Input [batch, in_channels, D, H, W] -> output [batch, out_channels, D, H, W]
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, channels, depth, height, width) = xs.dims5()?;
        if channels != self.in_channels {
            candle_core::bail!(
                "conv3d expects {} input channels, got {}",
                self.in_channels,
                channels
            );
        }

        // [batch, D + 2, C, H, W]: depth next to batch so a depth window folds into it
        let padded = xs
            .permute((0, 2, 1, 3, 4))?
            .contiguous()?
            .pad_with_zeros(1, PADDING, PADDING)?;

        let mut acc: Option<Tensor> = None;
        for tap in 0..KERNEL_SIZE {
            let slab = padded
                .narrow(1, tap, depth)?
                .contiguous()?
                .reshape((batch * depth, channels, height, width))?;
            let kernel = self.weight.narrow(2, tap, 1)?.squeeze(2)?.contiguous()?;
            let partial = slab.conv2d(&kernel, PADDING, 1, 1, 1)?;
            acc = Some(match acc {
                Some(sum) => (sum + partial)?,
                None => partial,
            });
        }

        let out = match acc {
            Some(out) => out,
            None => candle_core::bail!("conv3d kernel has no depth taps"),
        };

        out.reshape((batch, depth, self.out_channels, height, width))?
            .permute((0, 2, 1, 3, 4))?
            .contiguous()
    }
}
