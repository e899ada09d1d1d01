//! Relative attention layer configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a [`RelativeAttention`](super::RelativeAttention) layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativeAttentionConfig {
    /// Width of tokens, memory and relative embeddings
    pub d_model: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Dimension per head; `num_heads * head_dim` need not equal `d_model`
    pub head_dim: usize,

    /// Dropout on the output projection (residual path only)
    #[serde(default)]
    pub dropout: f64,

    /// Dropout on attention probabilities
    #[serde(default)]
    pub attention_dropout: f64,

    /// Additive bias on every projection
    #[serde(default)]
    pub use_bias: bool,

    /// Normalize the key/value source before projecting
    #[serde(default)]
    pub pre_norm: bool,

    /// Add the tokens back onto the projected output
    #[serde(default)]
    pub residual: bool,

    #[serde(default = "default_norm_eps")]
    pub norm_eps: f32,
}

fn default_norm_eps() -> f32 {
    1e-5
}

impl RelativeAttentionConfig {
    /// Bias-free, dropout-free, no residual.
    pub fn new(d_model: usize, num_heads: usize, head_dim: usize) -> Self {
        Self {
            d_model,
            num_heads,
            head_dim,
            dropout: 0.0,
            attention_dropout: 0.0,
            use_bias: false,
            pre_norm: false,
            residual: false,
            norm_eps: default_norm_eps(),
        }
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_attention_dropout(mut self, attention_dropout: f64) -> Self {
        self.attention_dropout = attention_dropout;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Add the tokens back onto the output. Without `pre_norm` the sum is
    /// layer-normalized.
    pub fn with_residual(mut self, residual: bool) -> Self {
        self.residual = residual;
        self
    }

    pub fn with_pre_norm(mut self, pre_norm: bool) -> Self {
        self.pre_norm = pre_norm;
        self
    }

    /// Projected width, `num_heads * head_dim`.
    pub fn units(&self) -> usize {
        self.num_heads * self.head_dim
    }

    /// Whether the layer owns a layer norm.
    pub fn uses_norm(&self) -> bool {
        self.residual || self.pre_norm
    }

    pub fn validate(&self) -> Result<()> {
        if self.d_model == 0 || self.num_heads == 0 || self.head_dim == 0 {
            return Err(Error::ConfigError {
                reason: format!(
                    "d_model ({}), num_heads ({}) and head_dim ({}) must be > 0",
                    self.d_model, self.num_heads, self.head_dim
                ),
            });
        }
        for (name, p) in [
            ("dropout", self.dropout),
            ("attention_dropout", self.attention_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::ConfigError {
                    reason: format!("{name} must be in [0, 1), got {p}"),
                });
            }
        }
        if self.norm_eps.is_nan() || self.norm_eps <= 0.0 {
            return Err(Error::ConfigError {
                reason: format!("norm_eps must be > 0, got {}", self.norm_eps),
            });
        }
        Ok(())
    }

    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::ModelError {
            reason: format!("IO error: {e}"),
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| Error::ModelError {
            reason: format!("YAML parse error: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::ModelError {
            reason: format!("IO error: {e}"),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| Error::ModelError {
            reason: format!("JSON parse error: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_yaml() {
        let yaml = r#"
d_model: 4
num_heads: 2
head_dim: 2
"#;
        let config: RelativeAttentionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config, RelativeAttentionConfig::new(4, 2, 2));
        assert_eq!(config.units(), 4);
        assert!(!config.uses_norm());
        config.validate().unwrap();
    }

    #[test]
    fn test_units_independent_of_d_model() {
        let config = RelativeAttentionConfig::new(6, 4, 3);
        assert_eq!(config.units(), 12);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_dims() {
        assert!(RelativeAttentionConfig::new(0, 2, 2).validate().is_err());
        assert!(RelativeAttentionConfig::new(4, 0, 2).validate().is_err());
        assert!(RelativeAttentionConfig::new(4, 2, 0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_dropout() {
        let config = RelativeAttentionConfig::new(4, 2, 2).with_dropout(1.0);
        assert!(matches!(config.validate(), Err(Error::ConfigError { .. })));
        let config = RelativeAttentionConfig::new(4, 2, 2).with_attention_dropout(-0.1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_residual_builder() {
        let post = RelativeAttentionConfig::new(4, 2, 2).with_residual(true);
        assert!(post.residual);
        assert!(!post.pre_norm);
        assert!(post.uses_norm());

        let pre = RelativeAttentionConfig::new(4, 2, 2)
            .with_residual(true)
            .with_pre_norm(true);
        assert!(pre.residual);
        assert!(pre.pre_norm);

        let plain = RelativeAttentionConfig::new(4, 2, 2).with_residual(false);
        assert!(!plain.residual);
        assert!(!plain.uses_norm());
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"d_model": 8, "num_heads": 2, "head_dim": 3, "use_bias": true, "dropout": 0.1}}"#
        )
        .unwrap();
        let config = RelativeAttentionConfig::load_json(file.path()).unwrap();
        assert_eq!(config.units(), 6);
        assert!(config.use_bias);
        assert_eq!(config.dropout, 0.1);
        assert_eq!(config.norm_eps, 1e-5);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "d_model: 4\nnum_heads: 2\nhead_dim: 2\ndropout: 1.5\n").unwrap();
        assert!(matches!(
            RelativeAttentionConfig::load_yaml(file.path()),
            Err(Error::ConfigError { .. })
        ));
        assert!(matches!(
            RelativeAttentionConfig::load_json("/nonexistent/relattn.json"),
            Err(Error::ModelError { .. })
        ));
    }
}
