pub mod relative_attention;

pub use relative_attention::{RelativeAttentionOps, RelativeScoreInput};
