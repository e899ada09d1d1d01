//! CPU implementation of RelativeAttentionOps, delegating to impl_generic

use crate::error::Result;
use crate::ops::impl_generic::relative_attention::{
    relative_attention_weights_impl, relative_shift_impl,
};
use crate::ops::traits::{RelativeAttentionOps, RelativeScoreInput};
use numr::autograd::Var;
use numr::runtime::cpu::{CpuClient, CpuRuntime};

impl RelativeAttentionOps<CpuRuntime> for CpuClient {
    fn relative_shift(&self, scores: &Var<CpuRuntime>, key_len: usize) -> Result<Var<CpuRuntime>> {
        relative_shift_impl(self, scores, key_len)
    }

    fn relative_attention_weights(
        &self,
        input: &RelativeScoreInput<'_, CpuRuntime>,
    ) -> Result<Var<CpuRuntime>> {
        relative_attention_weights_impl(self, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::tensor::Tensor;

    #[test]
    fn test_cpu_relative_shift_ramp() {
        let (client, device) = cpu_setup();
        // Q=2, M=1 → K=L=3
        let ramp = [0.0f32, 1.0, 2.0, 0.0, 1.0, 2.0];
        let scores = Var::new(
            Tensor::<CpuRuntime>::from_slice(&ramp, &[1, 1, 2, 3], &device),
            false,
        );
        let data: Vec<f32> = client.relative_shift(&scores, 3).unwrap().tensor().to_vec();
        assert_eq!(data, vec![1.0, 2.0, 0.0, 0.0, 1.0, 2.0]);
    }
}
