//! Neural network module traits for parameter access and serialization.

use crate::error::{Error, Result};
use numr::autograd::Var;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::collections::HashMap;

/// Core trait for neural network modules.
///
/// Provides access to trainable parameters for optimizers and
/// named parameters for checkpoint serialization.
///
/// Forward passes stay as inherent methods on each layer because
/// signatures differ (different client bounds, input types).
pub trait Module<R: Runtime> {
    /// All parameters, in a stable order.
    fn parameters(&self) -> Vec<&Var<R>>;

    /// Named parameters. Names use dot notation for nested modules:
    /// `"attn.q_proj.weight"`.
    fn named_parameters(&self) -> Vec<(String, &Var<R>)>;

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|v| v.tensor().numel()).sum()
    }
}

/// State dict serialization for parameter exchange.
pub trait StateDict<R: Runtime>: Module<R> {
    /// Export module state as name→tensor map.
    fn state_dict(&self) -> HashMap<String, Tensor<R>> {
        self.named_parameters()
            .into_iter()
            .map(|(name, var)| (name, var.tensor().clone()))
            .collect()
    }

    /// Load state from a name→tensor map.
    ///
    /// Returns error if required keys are missing or shapes don't match.
    fn load_state_dict(&mut self, state: &HashMap<String, Tensor<R>>) -> Result<()>;
}

/// Switch between training and evaluation behaviour (dropout and friends).
pub trait TrainMode {
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;
}

/// Prefix every name in `params` with `prefix.`.
pub(crate) fn prefixed<'a, R: Runtime>(
    prefix: &str,
    params: Vec<(String, &'a Var<R>)>,
) -> Vec<(String, &'a Var<R>)> {
    params
        .into_iter()
        .map(|(name, var)| (format!("{prefix}.{name}"), var))
        .collect()
}

/// Look up `name` in a state map and check it has `expected` shape.
pub(crate) fn take_state<R: Runtime>(
    state: &HashMap<String, Tensor<R>>,
    name: &str,
    expected: &[usize],
) -> Result<Tensor<R>> {
    let tensor = state.get(name).ok_or_else(|| Error::ModelError {
        reason: format!("missing state entry: {name}"),
    })?;
    if tensor.shape() != expected {
        return Err(Error::ModelError {
            reason: format!(
                "shape mismatch for '{name}': expected {expected:?}, got {:?}",
                tensor.shape()
            ),
        });
    }
    Ok(tensor.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Linear;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    #[test]
    fn test_prefixed_names() {
        let device = CpuDevice::new();
        let weight = Tensor::<CpuRuntime>::from_slice(&[1.0f32; 6], &[2, 3], &device);
        let bias = Tensor::<CpuRuntime>::from_slice(&[0.0f32; 2], &[2], &device);
        let linear = Linear::new(weight, Some(bias), true);

        let names: Vec<String> = prefixed("q_proj", linear.named_parameters())
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["q_proj.weight", "q_proj.bias"]);
    }

    #[test]
    fn test_take_state_checks_shape() {
        let device = CpuDevice::new();
        let mut state = HashMap::new();
        state.insert(
            "w".to_string(),
            Tensor::<CpuRuntime>::from_slice(&[1.0f32; 6], &[2, 3], &device),
        );

        assert!(take_state(&state, "w", &[2, 3]).is_ok());
        assert!(take_state(&state, "w", &[3, 2]).is_err());
        assert!(take_state(&state, "missing", &[2, 3]).is_err());
    }
}
