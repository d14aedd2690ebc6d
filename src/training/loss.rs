/// Smoothed absolute (Huber-style) reconstruction loss
use candle_core::{Result, Tensor};

/// Mean smooth L1 loss with transition point 1.0
///
/// Per element: `0.5 * d^2` when `|d| < 1`, `|d| - 0.5` otherwise, where
/// `d = prediction - target`; averaged over every element of the batch.
pub fn smooth_l1_loss(prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
    smooth_l1_loss_with_beta(prediction, target, 1.0)
}

/// Mean smooth L1 loss with an explicit transition point `beta`
///
/// Written as `0.5 * q^2 / beta + (|d| - q)` with `q = min(|d|, beta)`, which
/// equals the piecewise definition and keeps the graph branch-free.
pub fn smooth_l1_loss_with_beta(prediction: &Tensor, target: &Tensor, beta: f64) -> Result<Tensor> {
    if prediction.dims() != target.dims() {
        candle_core::bail!(
            "loss shape mismatch: prediction {:?} vs target {:?}",
            prediction.dims(),
            target.dims()
        );
    }

    let abs_diff = (prediction - target)?.abs()?;
    let clamp = abs_diff.ones_like()?.affine(beta, 0.0)?;
    let quadratic_part = abs_diff.minimum(&clamp)?;
    let linear_part = (&abs_diff - &quadratic_part)?;

    let quadratic = quadratic_part.sqr()?.affine(0.5 / beta, 0.0)?;
    (quadratic + linear_part)?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    #[test]
    fn test_quadratic_and_linear_regimes() -> Result<()> {
        let device = Device::Cpu;
        let prediction = Tensor::new(&[0.5f32, -3.0, 1.0, 0.0], &device)?;
        let target = Tensor::zeros(4, candle_core::DType::F32, &device)?;

        let loss = smooth_l1_loss(&prediction, &target)?.to_scalar::<f32>()?;
        // 0.125 + 2.5 + 0.5 + 0.0 over 4 elements
        let expected = (0.125 + 2.5 + 0.5 + 0.0) / 4.0;
        assert!((loss - expected).abs() < 1e-6, "loss {} vs {}", loss, expected);

        Ok(())
    }

    #[test]
    fn test_zero_for_perfect_prediction() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1.0, (2, 1, 3, 3, 3), &device)?;
        let loss = smooth_l1_loss(&x, &x)?.to_scalar::<f32>()?;
        assert_eq!(loss, 0.0);
        Ok(())
    }

    #[test]
    fn test_custom_beta() -> Result<()> {
        let device = Device::Cpu;
        let prediction = Tensor::new(&[0.1f32, 2.0], &device)?;
        let target = Tensor::new(&[0.0f32, 0.0], &device)?;

        let loss = smooth_l1_loss_with_beta(&prediction, &target, 0.5)?.to_scalar::<f32>()?;
        // 0.5 * 0.01 / 0.5 = 0.01 ; 2.0 - 0.25 = 1.75
        assert!((loss - (0.01 + 1.75) / 2.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_gradient() -> Result<()> {
        let device = Device::Cpu;
        let prediction = Var::new(&[0.5f32, -3.0], &device)?;
        let target = Tensor::zeros(2, candle_core::DType::F32, &device)?;

        let loss = smooth_l1_loss(prediction.as_tensor(), &target)?;
        let grads = loss.backward()?;
        let grad = grads
            .get(prediction.as_tensor())
            .expect("prediction has a gradient")
            .to_vec1::<f32>()?;

        // d/dp of mean: quadratic -> d / n, linear -> sign(d) / n
        assert!((grad[0] - 0.25).abs() < 1e-6);
        assert!((grad[1] + 0.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_rejected() -> Result<()> {
        let device = Device::Cpu;
        let a = Tensor::zeros((2, 3), candle_core::DType::F32, &device)?;
        let b = Tensor::zeros((3, 2), candle_core::DType::F32, &device)?;
        assert!(smooth_l1_loss(&a, &b).is_err());
        Ok(())
    }
}
