/// Global gradient-norm clipping
use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Var};

/// L2 norm of the concatenation of every parameter's gradient
///
/// Parameters absent from the store contribute nothing.
pub fn global_grad_norm(vars: &[Var], grads: &GradStore) -> Result<f64> {
    let mut total = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total += grad.sqr()?.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        }
    }
    Ok(total.sqrt())
}

/// Rescale all gradients so their global L2 norm is at most `max_norm`
///
/// When the norm exceeds `max_norm` every gradient is multiplied by
/// `max_norm / norm`; otherwise the store is left untouched.
///
/// # Returns
/// The norm before clipping
pub fn clip_grad_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let norm = global_grad_norm(vars, grads)?;

    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for var in vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let clipped = grad.affine(scale, 0.0)?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }

    Ok(norm)
}
