//! relattn error types

/// relattn result type
pub type Result<T> = std::result::Result<T, Error>;

/// relattn errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Tensor rank or length does not match what the operation requires
    #[error("shape error for '{arg}': {reason}")]
    ShapeError {
        /// Argument name
        arg: &'static str,
        /// What was expected and what was given
        reason: String,
    },

    /// Invalid hyperparameter
    #[error("config error: {reason}")]
    ConfigError {
        /// Description of what went wrong
        reason: String,
    },

    /// Weight lookup or config file error
    #[error("model error: {reason}")]
    ModelError {
        /// Description of what went wrong
        reason: String,
    },
}

impl Error {
    pub(crate) fn shape(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::ShapeError {
            arg,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_message() {
        let err = Error::shape("relatives", "expected rel_len 5, got 3");
        assert_eq!(
            err.to_string(),
            "shape error for 'relatives': expected rel_len 5, got 3"
        );
    }

    #[test]
    fn test_config_error_message() {
        let err = Error::ConfigError {
            reason: "num_heads must be > 0".into(),
        };
        assert_eq!(err.to_string(), "config error: num_heads must be > 0");
    }
}
