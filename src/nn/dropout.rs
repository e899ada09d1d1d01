//! Dropout regularization layer
//!
//! During training, randomly zeroes elements with probability `p` and scales
//! survivors by `1/(1-p)` (inverted dropout). During evaluation, acts as identity.

use crate::error::{Error, Result};
use crate::nn::module::TrainMode;
use numr::autograd::{Var, var_dropout};
use numr::ops::{BinaryOps, RandomOps, ScalarOps, TensorOps};
use numr::runtime::{Runtime, RuntimeClient};

/// Dropout layer with training/eval mode.
///
/// Starts in evaluation mode; call `set_training(true)` to enable dropping.
///
/// # Example
///
/// ```ignore
/// let mut dropout = Dropout::new(0.1)?;
/// let output = dropout.forward(&client, &input)?; // identity
///
/// dropout.set_training(true);
/// let output = dropout.forward(&client, &input)?; // applies dropout
/// ```
#[derive(Debug, Clone)]
pub struct Dropout {
    p: f64,
    training: bool,
}

impl Dropout {
    /// Create a new dropout layer with drop probability `p` in `[0, 1)`.
    pub fn new(p: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(Error::ConfigError {
                reason: format!("dropout probability must be in [0, 1), got {p}"),
            });
        }
        Ok(Self { p, training: false })
    }

    /// Returns the dropout probability.
    pub fn p(&self) -> f64 {
        self.p
    }

    /// Forward pass.
    ///
    /// In training mode: applies dropout with probability `p`.
    /// In eval mode: returns input unchanged.
    pub fn forward<R, C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = numr::dtype::DType>,
        C: RuntimeClient<R> + TensorOps<R> + RandomOps<R> + ScalarOps<R> + BinaryOps<R>,
        R::Client: TensorOps<R> + ScalarOps<R> + BinaryOps<R>,
    {
        if !self.training || self.p == 0.0 {
            return Ok(input.clone());
        }
        let (output, _mask) = var_dropout(input, self.p, client).map_err(Error::Numr)?;
        Ok(output)
    }
}

impl TrainMode for Dropout {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::runtime::cpu::CpuRuntime;
    use numr::tensor::Tensor;

    #[test]
    fn test_dropout_starts_in_eval_mode() {
        let (client, device) = cpu_setup();
        let input = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[4], &device),
            false,
        );

        let dropout = Dropout::new(0.5).unwrap();
        assert!(!dropout.is_training());

        let data: Vec<f32> = dropout.forward(&client, &input).unwrap().tensor().to_vec();
        assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_dropout_training_mode_zeroes_elements() {
        let (client, device) = cpu_setup();
        let input = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[1.0f32; 1000], &[1000], &device),
            false,
        );

        let mut dropout = Dropout::new(0.5).unwrap();
        dropout.set_training(true);
        let data: Vec<f32> = dropout.forward(&client, &input).unwrap().tensor().to_vec();

        let zeros = data.iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 300 && zeros < 700, "zeros: {zeros}");
    }

    #[test]
    fn test_dropout_zero_prob_in_training() {
        let (client, device) = cpu_setup();
        let input = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0], &[3], &device),
            false,
        );

        let mut dropout = Dropout::new(0.0).unwrap();
        dropout.set_training(true);
        let data: Vec<f32> = dropout.forward(&client, &input).unwrap().tensor().to_vec();
        assert_eq!(data, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_dropout_invalid_prob() {
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(f64::NAN).is_err());
    }
}
