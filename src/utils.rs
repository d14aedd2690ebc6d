/// Utility functions for Vdsr3d
use candle_core::{Device, Var};

/// Total number of scalar parameters across `vars`
pub fn count_parameters(vars: &[Var]) -> usize {
    vars.iter().map(|v| v.as_tensor().elem_count()).sum()
}

/// First CUDA device when available, otherwise the CPU
pub fn default_device() -> Device {
    match Device::cuda_if_available(0) {
        Ok(device) => device,
        Err(e) => {
            log::warn!("CUDA unavailable ({}), falling back to CPU", e);
            Device::Cpu
        }
    }
}
