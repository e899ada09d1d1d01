//! Boolean attention masks (`true` = key disallowed for that query).

use crate::error::{Error, Result};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Host-side boolean mask over `[Q, K]` or `[B, Q, K]`.
///
/// Normalized at forward time into an additive `[B, 1, Q, K]` tensor that
/// broadcasts over heads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttentionMask {
    data: Vec<bool>,
    shape: Vec<usize>,
}

impl AttentionMask {
    /// Mask from row-major data. `shape` must be `[Q, K]` or `[B, Q, K]`.
    pub fn new(data: Vec<bool>, shape: &[usize]) -> Result<Self> {
        if shape.len() != 2 && shape.len() != 3 {
            return Err(Error::shape(
                "mask",
                format!("rank must be 2 or 3, got shape {shape:?}"),
            ));
        }
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::shape(
                "mask",
                format!("{} values do not fill shape {shape:?}", data.len()),
            ));
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    /// `[Q, M + Q]` mask letting query `i` see all memory and tokens `0..=i`.
    pub fn causal(q_len: usize, mem_len: usize) -> Self {
        let k_len = mem_len + q_len;
        let data = (0..q_len)
            .flat_map(|i| (0..k_len).map(move |j| j > mem_len + i))
            .collect();
        Self {
            data,
            shape: vec![q_len, k_len],
        }
    }

    /// `[h, w]` banded window; positions outside the parallelogram band are
    /// disallowed. `left` selects the band leaning towards earlier keys.
    pub fn parallelogram(h: usize, w: usize, left: bool) -> Self {
        let m = h.min(w);
        let mut keep = vec![true; h * w];
        for r in 0..m {
            for c in 0..r {
                keep[r * w + c] = false;
            }
        }
        let (r0, c0) = (h - m, w - m);
        for r in 0..m {
            for c in (r + 1)..m {
                keep[(r0 + r) * w + c0 + c] = false;
            }
        }
        let data = (0..h)
            .flat_map(|r| {
                let src = if left { r } else { h - 1 - r };
                keep[src * w..(src + 1) * w].iter().map(|&k| !k).collect::<Vec<_>>()
            })
            .collect();
        Self {
            data,
            shape: vec![h, w],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[bool] {
        &self.data
    }

    /// Whether any key is disallowed.
    pub fn any(&self) -> bool {
        self.data.iter().any(|&m| m)
    }

    /// Additive `[batch, 1, q_len, k_len]` mask (0 allowed, -inf disallowed).
    ///
    /// `Ok(None)` when nothing is masked. A rank 2 mask is repeated across
    /// the batch. `dtype` must match the scores it is added to (F32 or F64).
    pub fn to_additive<R: Runtime<DType = DType>>(
        &self,
        batch: usize,
        q_len: usize,
        k_len: usize,
        dtype: DType,
        device: &R::Device,
    ) -> Result<Option<Tensor<R>>> {
        let (mask_batch, rows, cols) = match self.shape.as_slice() {
            &[q, k] => (None, q, k),
            &[b, q, k] => (Some(b), q, k),
            other => {
                return Err(Error::shape(
                    "mask",
                    format!("rank must be 2 or 3, got shape {other:?}"),
                ));
            }
        };
        if rows != q_len || cols != k_len {
            return Err(Error::shape(
                "mask",
                format!(
                    "expected [{q_len}, {k_len}] per batch element, got {:?}",
                    self.shape
                ),
            ));
        }
        if let Some(b) = mask_batch {
            if b != batch {
                return Err(Error::shape(
                    "mask",
                    format!("batch {b} does not match input batch {batch}"),
                ));
            }
        }
        if !self.any() {
            return Ok(None);
        }

        let plane = q_len * k_len;
        let disallowed: Vec<bool> = (0..batch)
            .flat_map(|b| {
                let start = if mask_batch.is_some() { b * plane } else { 0 };
                self.data[start..start + plane].iter().copied()
            })
            .collect();
        let shape = [batch, 1, q_len, k_len];
        let tensor = match dtype {
            DType::F32 => {
                let values: Vec<f32> = disallowed
                    .iter()
                    .map(|&m| if m { f32::NEG_INFINITY } else { 0.0 })
                    .collect();
                Tensor::<R>::from_slice(&values, &shape, device)
            }
            DType::F64 => {
                let values: Vec<f64> = disallowed
                    .iter()
                    .map(|&m| if m { f64::NEG_INFINITY } else { 0.0 })
                    .collect();
                Tensor::<R>::from_slice(&values, &shape, device)
            }
            other => {
                return Err(Error::ConfigError {
                    reason: format!("attention mask supports F32 and F64 scores, got {other:?}"),
                });
            }
        };
        Ok(Some(tensor))
    }
}
