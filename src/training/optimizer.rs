/// SGD with momentum and L2 weight decay
///
/// Per parameter, with momentum buffer `v` starting at zero:
/// `v = momentum * v + grad + weight_decay * param`, then `param -= lr * v`.
use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, Var};
use candle_nn::Optimizer;

/// SGD optimizer configuration
#[derive(Debug, Clone)]
pub struct SgdConfig {
    /// Learning rate
    pub lr: f64,
    /// Momentum coefficient
    pub momentum: f64,
    /// L2 weight decay coefficient
    pub weight_decay: f64,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 0.1,
            momentum: 0.9,
            weight_decay: 1e-4,
        }
    }
}

/// Per-parameter state: the parameter and its momentum buffer
#[derive(Debug)]
struct ParamState {
    var: Var,
    velocity: Tensor,
}

/// SGD with momentum
pub struct SgdMomentum {
    config: SgdConfig,
    states: Vec<ParamState>,
}

impl SgdMomentum {
    /// Get reference to parameters
    pub fn vars(&self) -> Vec<Var> {
        self.states.iter().map(|s| s.var.clone()).collect()
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }
}

impl Optimizer for SgdMomentum {
    type Config = SgdConfig;

    fn new(vars: Vec<Var>, config: SgdConfig) -> Result<Self> {
        let states = vars
            .into_iter()
            .map(|var| {
                let velocity = var.as_tensor().zeros_like()?;
                Ok(ParamState { var, velocity })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { config, states })
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        for state in self.states.iter_mut() {
            let grad = match grads.get(state.var.as_tensor()) {
                Some(grad) => grad,
                None => continue,
            };
            let param = state.var.as_tensor().detach();

            let mut update = grad.detach();
            if self.config.weight_decay != 0.0 {
                update = (update + param.affine(self.config.weight_decay, 0.0)?)?;
            }
            state.velocity = (state.velocity.affine(self.config.momentum, 0.0)? + update)?;

            let next = (param - state.velocity.affine(self.config.lr, 0.0)?)?;
            state.var.set(&next)?;
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn scalar_param(value: f32) -> Result<Var> {
        Var::new(&[value], &Device::Cpu)
    }

    /// Gradient store in which `var` has gradient `g`
    fn grads_for(var: &Var, g: f32) -> Result<GradStore> {
        let c = Tensor::new(&[g], &Device::Cpu)?;
        (var.as_tensor() * c)?.sum_all()?.backward()
    }

    fn value(var: &Var) -> Result<f32> {
        Ok(var.as_tensor().to_vec1::<f32>()?[0])
    }

    #[test]
    fn test_sgd_creation() -> Result<()> {
        let param = Var::zeros((4, 4), DType::F32, &Device::Cpu)?;
        let optimizer = SgdMomentum::new(vec![param], SgdConfig::default())?;

        assert_eq!(optimizer.learning_rate(), 0.1);
        assert_eq!(optimizer.vars().len(), 1);
        Ok(())
    }

    #[test]
    fn test_plain_step() -> Result<()> {
        let param = scalar_param(1.0)?;
        let config = SgdConfig {
            lr: 0.1,
            momentum: 0.0,
            weight_decay: 0.0,
        };
        let mut optimizer = SgdMomentum::new(vec![param.clone()], config)?;

        optimizer.step(&grads_for(&param, 2.0)?)?;
        assert!((value(&param)? - 0.8).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_momentum_accumulates() -> Result<()> {
        let param = scalar_param(1.0)?;
        let config = SgdConfig {
            lr: 0.1,
            momentum: 0.9,
            weight_decay: 0.0,
        };
        let mut optimizer = SgdMomentum::new(vec![param.clone()], config)?;

        // v1 = 1.0 -> p = 0.9
        optimizer.step(&grads_for(&param, 1.0)?)?;
        assert!((value(&param)? - 0.9).abs() < 1e-6);

        // v2 = 0.9 * 1.0 + 1.0 = 1.9 -> p = 0.9 - 0.19 = 0.71
        optimizer.step(&grads_for(&param, 1.0)?)?;
        assert!((value(&param)? - 0.71).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_weight_decay_enters_velocity() -> Result<()> {
        let param = scalar_param(2.0)?;
        let config = SgdConfig {
            lr: 0.5,
            momentum: 0.9,
            weight_decay: 0.1,
        };
        let mut optimizer = SgdMomentum::new(vec![param.clone()], config)?;

        // v = 0 + 1.0 + 0.1 * 2.0 = 1.2 -> p = 2.0 - 0.6 = 1.4
        optimizer.step(&grads_for(&param, 1.0)?)?;
        assert!((value(&param)? - 1.4).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_lr_scheduling() -> Result<()> {
        let param = scalar_param(1.0)?;
        let mut optimizer = SgdMomentum::new(vec![param.clone()], SgdConfig::default())?;

        optimizer.set_learning_rate(0.01);
        assert_eq!(optimizer.learning_rate(), 0.01);

        let config = SgdConfig {
            momentum: 0.0,
            weight_decay: 0.0,
            ..optimizer.config().clone()
        };
        let mut optimizer = SgdMomentum::new(vec![param.clone()], config)?;
        optimizer.step(&grads_for(&param, 1.0)?)?;
        assert!((value(&param)? - 0.99).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_param_without_gradient_untouched() -> Result<()> {
        let used = scalar_param(1.0)?;
        let unused = scalar_param(5.0)?;
        let mut optimizer =
            SgdMomentum::new(vec![used.clone(), unused.clone()], SgdConfig::default())?;

        optimizer.step(&grads_for(&used, 1.0)?)?;
        assert_eq!(value(&unused)?, 5.0);
        Ok(())
    }
}
