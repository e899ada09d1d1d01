//! Learned content/position query biases for relative attention.
//!
//! One pair is shared by every attention block of a model and handed to each
//! block's forward.

use crate::error::{Error, Result};
use crate::nn::VarBuilder;
use crate::nn::module::{Module, StateDict, take_state};
use numr::autograd::{Var, var_reshape};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::collections::HashMap;

/// The two query biases, each `[num_heads, head_dim]`.
pub struct RelativeBiases<R: Runtime> {
    /// Added to queries before the content (query·key) term
    pub content: Var<R>,
    /// Added to queries before the position (query·relative) term
    pub position: Var<R>,
}

/// Parameter source for the content and position biases.
///
/// Stores both vectors flat (`[num_heads * head_dim]`) and hands them out per
/// head. The values do not depend on the batch they are requested for.
pub struct RelativeBias<R: Runtime> {
    content: Var<R>,
    position: Var<R>,
    num_heads: usize,
    head_dim: usize,
}

impl<R: Runtime<DType = DType>> RelativeBias<R> {
    /// Zero-initialized biases.
    pub fn new(num_heads: usize, head_dim: usize, device: &R::Device) -> Result<Self> {
        check_dims(num_heads, head_dim)?;
        let units = num_heads * head_dim;
        Ok(Self {
            content: Var::new(Tensor::<R>::zeros(&[units], DType::F32, device), true),
            position: Var::new(Tensor::<R>::zeros(&[units], DType::F32, device), true),
            num_heads,
            head_dim,
        })
    }

    /// Load `content_bias` / `position_bias` from a VarBuilder.
    pub fn from_varbuilder(
        vb: &mut VarBuilder<R>,
        num_heads: usize,
        head_dim: usize,
        trainable: bool,
    ) -> Result<Self> {
        check_dims(num_heads, head_dim)?;
        let units = num_heads * head_dim;
        let content = vb.take_with_shape("content_bias", &[units])?;
        let position = vb.take_with_shape("position_bias", &[units])?;
        Ok(Self {
            content: Var::new(content, trainable),
            position: Var::new(position, trainable),
            num_heads,
            head_dim,
        })
    }
}

impl<R: Runtime> RelativeBias<R> {
    /// Biases for `reference`, a `[B, S, d_model]` batch.
    ///
    /// The batch only fixes which device/graph the caller is working in; the
    /// returned values are the same for every batch element and position.
    pub fn forward(&self, reference: &Var<R>) -> Result<RelativeBiases<R>> {
        if reference.shape().len() != 3 {
            return Err(Error::shape(
                "reference",
                format!("expected 3D [B, S, d_model], got {:?}", reference.shape()),
            ));
        }
        let shape = [self.num_heads, self.head_dim];
        Ok(RelativeBiases {
            content: var_reshape(&self.content, &shape).map_err(Error::Numr)?,
            position: var_reshape(&self.position, &shape).map_err(Error::Numr)?,
        })
    }

    /// Flat parameters in `[content, position]` order.
    pub fn weights(&self) -> [Tensor<R>; 2] {
        [self.content.tensor().clone(), self.position.tensor().clone()]
    }

    /// Replace both biases; each must be `[num_heads * head_dim]`.
    pub fn set_weights(&mut self, weights: [Tensor<R>; 2]) -> Result<()> {
        let units = self.num_heads * self.head_dim;
        for (arg, t) in [("content_bias", &weights[0]), ("position_bias", &weights[1])] {
            if t.shape() != &[units] {
                return Err(Error::shape(
                    arg,
                    format!("expected [{units}], got {:?}", t.shape()),
                ));
            }
        }
        let trainable = self.content.requires_grad();
        let [content, position] = weights;
        self.content = Var::new(content, trainable);
        self.position = Var::new(position, trainable);
        Ok(())
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}

impl<R: Runtime> Module<R> for RelativeBias<R> {
    fn parameters(&self) -> Vec<&Var<R>> {
        vec![&self.content, &self.position]
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        vec![
            ("content_bias".to_string(), &self.content),
            ("position_bias".to_string(), &self.position),
        ]
    }
}

impl<R: Runtime> StateDict<R> for RelativeBias<R> {
    fn load_state_dict(&mut self, state: &HashMap<String, Tensor<R>>) -> Result<()> {
        let units = self.num_heads * self.head_dim;
        let content = take_state(state, "content_bias", &[units])?;
        let position = take_state(state, "position_bias", &[units])?;
        self.set_weights([content, position])
    }
}

fn check_dims(num_heads: usize, head_dim: usize) -> Result<()> {
    if num_heads == 0 || head_dim == 0 {
        return Err(Error::ConfigError {
            reason: format!("num_heads ({num_heads}) and head_dim ({head_dim}) must be > 0"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::VarMap;
    use crate::test_utils::cpu_setup;
    use numr::runtime::cpu::CpuRuntime;

    fn tokens(device: &numr::runtime::cpu::CpuDevice) -> Var<CpuRuntime> {
        Var::new(
            Tensor::<CpuRuntime>::from_slice(&[0.5f32; 2 * 3 * 4], &[2, 3, 4], device),
            false,
        )
    }

    #[test]
    fn test_bias_starts_at_zero() {
        let (_client, device) = cpu_setup();
        let bias = RelativeBias::<CpuRuntime>::new(2, 2, &device).unwrap();
        let out = bias.forward(&tokens(&device)).unwrap();
        assert_eq!(out.content.shape(), &[2, 2]);
        assert_eq!(out.position.shape(), &[2, 2]);
        assert_eq!(out.content.tensor().to_vec::<f32>(), vec![0.0; 4]);
        assert_eq!(out.position.tensor().to_vec::<f32>(), vec![0.0; 4]);
    }

    #[test]
    fn test_set_weights_order() {
        let (_client, device) = cpu_setup();
        let mut bias = RelativeBias::<CpuRuntime>::new(2, 2, &device).unwrap();
        let content = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[4], &device);
        let position = Tensor::<CpuRuntime>::from_slice(&[5.0f32, 6.0, 7.0, 8.0], &[4], &device);
        bias.set_weights([content, position]).unwrap();

        let out = bias.forward(&tokens(&device)).unwrap();
        // head 0 = first two values, head 1 = last two
        assert_eq!(out.content.tensor().to_vec::<f32>(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.position.tensor().to_vec::<f32>(), vec![5.0, 6.0, 7.0, 8.0]);

        let [c, p] = bias.weights();
        assert_eq!(c.to_vec::<f32>(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(p.to_vec::<f32>(), vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_set_weights_rejects_wrong_length() {
        let (_client, device) = cpu_setup();
        let mut bias = RelativeBias::<CpuRuntime>::new(2, 2, &device).unwrap();
        let short = Tensor::<CpuRuntime>::from_slice(&[1.0f32; 3], &[3], &device);
        let ok = Tensor::<CpuRuntime>::from_slice(&[1.0f32; 4], &[4], &device);
        assert!(bias.set_weights([short, ok]).is_err());
    }

    #[test]
    fn test_invalid_dims() {
        let (_client, device) = cpu_setup();
        assert!(RelativeBias::<CpuRuntime>::new(0, 2, &device).is_err());
        assert!(RelativeBias::<CpuRuntime>::new(2, 0, &device).is_err());
    }

    #[test]
    fn test_forward_requires_batched_reference() {
        let (_client, device) = cpu_setup();
        let bias = RelativeBias::<CpuRuntime>::new(1, 2, &device).unwrap();
        let flat = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[0.0f32; 4], &[2, 2], &device),
            false,
        );
        assert!(bias.forward(&flat).is_err());
    }

    #[test]
    fn test_state_dict_roundtrip_and_varbuilder() {
        let (_client, device) = cpu_setup();
        let mut bias = RelativeBias::<CpuRuntime>::new(1, 3, &device).unwrap();
        bias.set_weights([
            Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0], &[3], &device),
            Tensor::<CpuRuntime>::from_slice(&[4.0f32, 5.0, 6.0], &[3], &device),
        ])
        .unwrap();
        assert_eq!(bias.num_parameters(), 6);

        let state = bias.state_dict();
        let mut other = RelativeBias::<CpuRuntime>::new(1, 3, &device).unwrap();
        other.load_state_dict(&state).unwrap();
        assert_eq!(other.weights()[1].to_vec::<f32>(), vec![4.0, 5.0, 6.0]);

        let mut map = VarMap::from(state);
        let mut vb = VarBuilder::new(&mut map);
        let loaded = RelativeBias::<CpuRuntime>::from_varbuilder(&mut vb, 1, 3, false).unwrap();
        assert_eq!(loaded.weights()[0].to_vec::<f32>(), vec![1.0, 2.0, 3.0]);
    }
}
