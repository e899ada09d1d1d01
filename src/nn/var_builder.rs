//! VarBuilder: scoped access to weights in a VarMap.
//!
//! Provides prefix-based navigation for hierarchical weight names
//! (e.g., "layers.0.attn.q_proj.weight").

use crate::error::{Error, Result};
use crate::nn::varmap::VarMap;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Scoped access to weights in a `VarMap`.
pub struct VarBuilder<'a, R: Runtime> {
    varmap: &'a mut VarMap<R>,
    prefix: String,
}

impl<'a, R: Runtime> VarBuilder<'a, R> {
    /// Create a root VarBuilder.
    pub fn new(varmap: &'a mut VarMap<R>) -> Self {
        Self {
            varmap,
            prefix: String::new(),
        }
    }

    /// Create a sub-builder with an additional prefix component.
    pub fn push_prefix(&mut self, segment: &str) -> VarBuilder<'_, R> {
        let prefix = if self.prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", self.prefix, segment)
        };
        VarBuilder {
            varmap: self.varmap,
            prefix,
        }
    }

    /// Alias for `push_prefix`.
    pub fn pp(&mut self, segment: &str) -> VarBuilder<'_, R> {
        self.push_prefix(segment)
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Take a tensor by name, removing it from the map (zero-copy).
    pub fn take_tensor(&mut self, name: &str) -> Result<Tensor<R>> {
        let full = self.full_name(name);
        self.varmap.take_tensor(&full)
    }

    /// Take a tensor and validate its shape.
    pub fn take_with_shape(&mut self, name: &str, expected_shape: &[usize]) -> Result<Tensor<R>> {
        let full = self.full_name(name);
        let actual = self.varmap.get_tensor(&full)?.shape().to_vec();
        if actual != expected_shape {
            return Err(Error::ModelError {
                reason: format!(
                    "shape mismatch for '{full}': expected {expected_shape:?}, got {actual:?}"
                ),
            });
        }
        self.varmap.take_tensor(&full)
    }

    /// Take a tensor if present; `Ok(None)` when absent.
    pub fn take_optional(
        &mut self,
        name: &str,
        expected_shape: &[usize],
    ) -> Result<Option<Tensor<R>>> {
        if self.contains(name) {
            self.take_with_shape(name, expected_shape).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Check if a name exists (relative to prefix).
    pub fn contains(&self, name: &str) -> bool {
        self.varmap.contains(&self.full_name(name))
    }

    /// Current prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
