//! Transformer-XL relative multi-head attention with segment memory.

pub mod config;
pub mod layer;
pub mod mask;

pub use config::RelativeAttentionConfig;
pub use layer::{RelativeAttention, RelativeAttentionInput, RelativeAttentionOutput};
pub use mask::AttentionMask;
