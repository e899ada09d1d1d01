pub mod cpu;
pub mod impl_generic;
pub mod traits;

pub use traits::{RelativeAttentionOps, RelativeScoreInput};
