pub mod relative_attention;

pub use relative_attention::{
    relative_attention_weights_impl, relative_offset, relative_shift_impl,
};
