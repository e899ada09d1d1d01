//! VarMap: named collection of model weights.

use crate::error::{Error, Result};
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::collections::HashMap;

/// Named collection of model weights.
///
/// Holds whatever an external loader produced; attention modules take their
/// tensors out of it by dotted name through a [`VarBuilder`](super::VarBuilder).
pub struct VarMap<R: Runtime> {
    data: HashMap<String, Tensor<R>>,
}

impl<R: Runtime> VarMap<R> {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Insert (or overwrite) a tensor.
    pub fn insert(&mut self, name: String, tensor: Tensor<R>) {
        self.data.insert(name, tensor);
    }

    /// Get a tensor by name.
    pub fn get_tensor(&self, name: &str) -> Result<&Tensor<R>> {
        self.data.get(name).ok_or_else(|| Error::ModelError {
            reason: format!("weight not found: {name}"),
        })
    }

    /// Remove and return a tensor by name (zero-copy extraction).
    pub fn take_tensor(&mut self, name: &str) -> Result<Tensor<R>> {
        self.data.remove(name).ok_or_else(|| Error::ModelError {
            reason: format!("weight not found: {name}"),
        })
    }

    /// All weight names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|s| s.as_str())
    }

    /// Number of weights.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if a name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }
}

impl<R: Runtime> Default for VarMap<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime> From<HashMap<String, Tensor<R>>> for VarMap<R> {
    /// Wrap a state dict (e.g. from `StateDict::state_dict`).
    fn from(data: HashMap<String, Tensor<R>>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    fn device() -> CpuDevice {
        CpuDevice::new()
    }

    #[test]
    fn test_varmap_insert_and_get() {
        let d = device();
        let mut map = VarMap::<CpuRuntime>::new();
        map.insert("w1".into(), Tensor::from_slice(&[1.0f32, 2.0], &[2], &d));
        assert_eq!(map.len(), 1);
        assert!(map.contains("w1"));
        assert!(!map.contains("w2"));
        assert_eq!(map.get_tensor("w1").unwrap().shape(), &[2]);
        assert!(map.get_tensor("w2").is_err());
    }

    #[test]
    fn test_varmap_take() {
        let d = device();
        let mut map = VarMap::<CpuRuntime>::new();
        map.insert("w".into(), Tensor::from_slice(&[1.0f32, 2.0], &[2], &d));

        let t = map.take_tensor("w").unwrap();
        assert_eq!(t.shape(), &[2]);
        assert!(map.is_empty());
        assert!(map.take_tensor("w").is_err());
    }

    #[test]
    fn test_varmap_from_state_dict() {
        let d = device();
        let mut state = HashMap::new();
        state.insert("x".to_string(), Tensor::<CpuRuntime>::from_slice(&[1.0f32], &[1], &d));
        state.insert("y".to_string(), Tensor::<CpuRuntime>::from_slice(&[2.0f32], &[1], &d));

        let map = VarMap::from(state);
        let mut names: Vec<&str> = map.names().collect();
        names.sort();
        assert_eq!(names, vec!["x", "y"]);
    }
}
