//! # relattn
//!
//! **Transformer-XL relative multi-head attention with segment memory, built on numr.**
//!
//! One attention block attends over `[memory; tokens]` using relative-position
//! offsets instead of absolute positions. Its learned content/position query
//! biases come from a separate [`RelativeBias`] module so a stack of blocks can
//! share one pair.
//!
//! ```text
//! tokens ──► RelativeBias ──► (content_bias, position_bias)
//!                                      │
//! tokens, relatives, memory ──► RelativeAttention ──► updated tokens
//! ```
//!
//! ## Design
//!
//! - **nn**: parameter-holding layers (`RelativeAttention`, `RelativeBias`,
//!   `Linear`, `LayerNorm`, `Dropout`) with `Module` / `StateDict` access
//! - **Extension trait**: `RelativeAttentionOps` implemented on numr's clients
//! - **impl_generic**: the relative shift and score composition, built from
//!   numr autograd primitives and shared by every backend

pub mod error;
pub mod nn;
pub mod ops;

pub use error::{Error, Result};
pub use nn::{
    AttentionMask, RelativeAttention, RelativeAttentionConfig, RelativeAttentionInput,
    RelativeAttentionOutput, RelativeBias, RelativeBiases,
};
pub use ops::RelativeAttentionOps;

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::error::{Error as NumrError, Result as NumrResult};
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;

#[cfg(test)]
pub(crate) mod test_utils {
    use numr::runtime::cpu::{CpuClient, CpuDevice};

    /// Create a CPU client and device for use in unit tests.
    pub(crate) fn cpu_setup() -> (CpuClient, CpuDevice) {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        (client, device)
    }
}
