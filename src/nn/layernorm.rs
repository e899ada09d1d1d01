//! Layer Normalization module
//!
//! LayerNorm: output = (x - mean) / sqrt(var + eps) * weight + bias
//! Composed from numr autograd primitives for training support.

use crate::error::{Error, Result};
use crate::nn::module::Module;
use numr::autograd::{
    Var, var_add, var_add_scalar, var_div, var_mean, var_mul, var_sqrt, var_sub,
};
use numr::dtype::DType;
use numr::ops::{ReduceOps, ScalarOps, TensorOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Layer Normalization over the last dimension
///
/// weight (gamma): `[hidden_size]`
/// bias (beta): `[hidden_size]`
pub struct LayerNorm<R: Runtime> {
    weight: Var<R>,
    bias: Var<R>,
    eps: f64,
}

impl<R: Runtime> LayerNorm<R> {
    pub fn new(weight: Tensor<R>, bias: Tensor<R>, eps: f32, trainable: bool) -> Self {
        Self {
            weight: Var::new(weight, trainable),
            bias: Var::new(bias, trainable),
            eps: eps as f64,
        }
    }

    /// Identity-initialized norm (gamma = 1, beta = 0).
    pub fn identity(hidden_size: usize, eps: f32, device: &R::Device) -> Self
    where
        R: Runtime<DType = DType>,
    {
        Self::new(
            Tensor::<R>::ones(&[hidden_size], DType::F32, device),
            Tensor::<R>::zeros(&[hidden_size], DType::F32, device),
            eps,
            true,
        )
    }

    /// Forward: (x - mean) / sqrt(var + eps) * weight + bias
    ///
    /// input: `[..., hidden_size]`, output: same shape
    pub fn forward<C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        C: RuntimeClient<R> + TensorOps<R> + ScalarOps<R> + ReduceOps<R>,
        R::Client: TensorOps<R> + ScalarOps<R> + ReduceOps<R>,
    {
        let ndim = input.shape().len();
        if ndim == 0 || input.shape()[ndim - 1] != self.hidden_size() {
            return Err(Error::shape(
                "input",
                format!(
                    "last dim must be {}, got shape {:?}",
                    self.hidden_size(),
                    input.shape()
                ),
            ));
        }
        let last_dim = ndim - 1;

        let mean = var_mean(input, &[last_dim], true, client).map_err(Error::Numr)?;
        let centered = var_sub(input, &mean, client).map_err(Error::Numr)?;

        // biased variance, matching the usual framework definition
        let sq = var_mul(&centered, &centered, client).map_err(Error::Numr)?;
        let variance = var_mean(&sq, &[last_dim], true, client).map_err(Error::Numr)?;

        let var_eps = var_add_scalar(&variance, self.eps, client).map_err(Error::Numr)?;
        let std = var_sqrt(&var_eps, client).map_err(Error::Numr)?;
        let normed = var_div(&centered, &std, client).map_err(Error::Numr)?;

        let scaled = var_mul(&normed, &self.weight, client).map_err(Error::Numr)?;
        var_add(&scaled, &self.bias, client).map_err(Error::Numr)
    }

    pub fn weight(&self) -> &Var<R> {
        &self.weight
    }

    pub fn bias(&self) -> &Var<R> {
        &self.bias
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn hidden_size(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl<R: Runtime> Module<R> for LayerNorm<R> {
    fn parameters(&self) -> Vec<&Var<R>> {
        vec![&self.weight, &self.bias]
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        vec![
            ("weight".to_string(), &self.weight),
            ("bias".to_string(), &self.bias),
        ]
    }
}
