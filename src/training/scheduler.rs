//! Step-decay learning rate schedule
//!
//! The learning rate is a pure function of the zero-based epoch index:
//! `lr = base_lr * gamma ^ floor(epoch / step_size)`, with no lower bound.

/// Step decay scheduler configuration
#[derive(Debug, Clone)]
pub struct StepDecayConfig {
    /// Learning rate for the first `step_size` epochs
    pub base_lr: f64,
    /// Number of epochs between decays
    pub step_size: usize,
    /// Multiplicative factor applied at each decay
    pub gamma: f64,
}

impl Default for StepDecayConfig {
    fn default() -> Self {
        Self {
            base_lr: 0.1,
            step_size: 10,
            gamma: 0.1,
        }
    }
}

/// Step decay learning rate scheduler
#[derive(Debug, Clone)]
pub struct StepDecayScheduler {
    config: StepDecayConfig,
}

impl StepDecayScheduler {
    /// Create new scheduler; `step_size` must be > 0
    pub fn new(config: StepDecayConfig) -> crate::Result<Self> {
        if config.step_size == 0 {
            return Err(crate::VdsrError::Config(
                "lr step interval must be > 0".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Learning rate for a zero-based epoch index
    pub fn lr_at_epoch(&self, epoch: usize) -> f64 {
        let decays = (epoch / self.config.step_size) as i32;
        self.config.base_lr * self.config.gamma.powi(decays)
    }

    pub fn config(&self) -> &StepDecayConfig {
        &self.config
    }
}
