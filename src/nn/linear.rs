//! Dense linear layer

use crate::error::{Error, Result};
use crate::nn::module::Module;
use numr::autograd::{Var, var_add, var_matmul, var_transpose};
use numr::dtype::DType;
use numr::ops::TensorOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Dense linear layer: output = input @ weight^T + bias
///
/// `weight` is stored `[out_features, in_features]`. Kernel-layout
/// (`[in_features, out_features]`) constructors and accessors convert at the
/// boundary so callers exporting from input-major frameworks need no transpose.
pub struct Linear<R: Runtime> {
    weight: Var<R>,
    bias: Option<Var<R>>,
}

impl<R: Runtime> Linear<R> {
    /// Create from loaded tensors. `trainable` controls gradient tracking.
    pub fn new(weight: Tensor<R>, bias: Option<Tensor<R>>, trainable: bool) -> Self {
        Self {
            weight: Var::new(weight, trainable),
            bias: bias.map(|b| Var::new(b, trainable)),
        }
    }

    /// Create from a kernel in `[in_features, out_features]` layout.
    pub fn from_kernel(kernel: &Tensor<R>, bias: Option<Tensor<R>>, trainable: bool) -> Result<Self> {
        if kernel.shape().len() != 2 {
            return Err(Error::shape(
                "kernel",
                format!("expected 2D [in, out], got {:?}", kernel.shape()),
            ));
        }
        let out_features = kernel.shape()[1];
        if let Some(b) = &bias {
            if b.shape() != &[out_features] {
                return Err(Error::shape(
                    "bias",
                    format!("expected [{out_features}], got {:?}", b.shape()),
                ));
            }
        }
        let weight = kernel.transpose(-2, -1).map_err(Error::Numr)?.contiguous();
        Ok(Self::new(weight, bias, trainable))
    }

    /// Zero-initialized layer mapping `in_features` to `out_features`.
    pub fn zeros(
        in_features: usize,
        out_features: usize,
        with_bias: bool,
        device: &R::Device,
    ) -> Self
    where
        R: Runtime<DType = DType>,
    {
        let weight = Tensor::<R>::zeros(&[out_features, in_features], DType::F32, device);
        let bias = with_bias.then(|| Tensor::<R>::zeros(&[out_features], DType::F32, device));
        Self::new(weight, bias, true)
    }

    /// Forward: input @ weight^T + bias
    ///
    /// input: `[..., in_features]`, output: `[..., out_features]`
    pub fn forward<C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        C: RuntimeClient<R> + TensorOps<R>,
        R::Client: TensorOps<R>,
    {
        let in_features = self.in_features();
        if input.shape().last() != Some(&in_features) {
            return Err(Error::shape(
                "input",
                format!(
                    "last dim must be {in_features}, got shape {:?}",
                    input.shape()
                ),
            ));
        }
        let w_t = var_transpose(&self.weight).map_err(Error::Numr)?;
        let output = var_matmul(input, &w_t, client).map_err(Error::Numr)?;
        match &self.bias {
            Some(bias) => var_add(&output, bias, client).map_err(Error::Numr),
            None => Ok(output),
        }
    }

    pub fn weight(&self) -> &Var<R> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Var<R>> {
        self.bias.as_ref()
    }

    /// Weight in `[in_features, out_features]` layout.
    pub fn kernel(&self) -> Result<Tensor<R>> {
        let t = self
            .weight
            .tensor()
            .transpose(-2, -1)
            .map_err(Error::Numr)?;
        Ok(t.contiguous())
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl<R: Runtime> Module<R> for Linear<R> {
    fn parameters(&self) -> Vec<&Var<R>> {
        let mut params = vec![&self.weight];
        if let Some(b) = &self.bias {
            params.push(b);
        }
        params
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = vec![("weight".to_string(), &self.weight)];
        if let Some(b) = &self.bias {
            params.push(("bias".to_string(), b));
        }
        params
    }
}
