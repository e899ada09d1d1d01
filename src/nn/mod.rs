pub mod dropout;
pub mod layernorm;
pub mod linear;
pub mod module;
pub mod relative_attention;
pub mod relative_bias;
pub mod var_builder;
pub mod varmap;

pub use dropout::Dropout;
pub use layernorm::LayerNorm;
pub use linear::Linear;
pub use module::{Module, StateDict, TrainMode};
pub use relative_attention::{
    AttentionMask, RelativeAttention, RelativeAttentionConfig, RelativeAttentionInput,
    RelativeAttentionOutput,
};
pub use relative_bias::{RelativeBias, RelativeBiases};
pub use var_builder::VarBuilder;
pub use varmap::VarMap;
