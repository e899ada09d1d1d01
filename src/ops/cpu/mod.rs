pub mod relative_attention;
