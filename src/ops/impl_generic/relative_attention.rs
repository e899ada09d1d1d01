//! Generic relative-position attention scores
//!
//! Shared by every backend.
//! Two bilinear terms share one softmax:
//! - content: `(q + u) @ k^T`, aligned by key position
//! - position: `(q + v) @ r^T`, indexed by relative offset, then shifted onto
//!   key positions with an explicit gather

use crate::error::{Error, Result};
use crate::ops::traits::RelativeScoreInput;
use numr::autograd::{
    Var, var_add, var_gather, var_matmul, var_mul, var_mul_scalar, var_reshape, var_softmax,
    var_transpose,
};
use numr::dtype::DType;
use numr::ops::{IndexingOps, ScalarOps, TensorOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Offset row read by query `i` for key `j`, or `None` when the key lies after
/// the query (offset past the last row) or the pair falls outside the table
/// (`rel_len < key_len`, `q_len == 0`, or an offset before the first row).
///
/// `rel_len - 1` is distance 0, so the diagonal `j = (key_len - q_len) + i`
/// maps to the last row and every step back in `j` moves one row up.
#[inline]
pub fn relative_offset(
    i: usize,
    j: usize,
    q_len: usize,
    key_len: usize,
    rel_len: usize,
) -> Option<usize> {
    let r = (rel_len.checked_sub(key_len)? + q_len.checked_sub(1)? + j).checked_sub(i)?;
    (r < rel_len).then_some(r)
}

/// Relative shift: `[B, H, Q, L]` offset-indexed scores → `[B, H, Q, key_len]`.
///
/// Equivalent to the pad-one-column / reshape / drop-row trick but expressed as
/// a gather, so it does not depend on row-major layout and never wraps
/// entries from the next query row into future key positions.
pub fn relative_shift_impl<R, C>(client: &C, scores: &Var<R>, key_len: usize) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + TensorOps<R> + ScalarOps<R> + IndexingOps<R>,
    R::Client: TensorOps<R> + ScalarOps<R> + IndexingOps<R>,
{
    let shape = scores.shape().to_vec();
    if shape.len() != 4 {
        return Err(Error::shape(
            "scores",
            format!("expected 4D [B, H, Q, L], got {}D", shape.len()),
        ));
    }
    let [batch, heads, q_len, rel_len] = [shape[0], shape[1], shape[2], shape[3]];
    if q_len == 0 {
        return Err(Error::shape("scores", "query length must be > 0"));
    }
    if key_len < q_len {
        return Err(Error::shape(
            "key_len",
            format!("key_len ({key_len}) must be >= query length ({q_len})"),
        ));
    }
    if rel_len < key_len {
        return Err(Error::shape(
            "scores",
            format!("relative length ({rel_len}) must cover key_len ({key_len})"),
        ));
    }

    let mut index = Vec::with_capacity(q_len * key_len);
    let mut keep = Vec::with_capacity(q_len * key_len);
    for i in 0..q_len {
        for j in 0..key_len {
            match relative_offset(i, j, q_len, key_len, rel_len) {
                Some(r) => {
                    index.push(r as i64);
                    keep.push(1.0f32);
                }
                None => {
                    index.push((rel_len - 1) as i64);
                    keep.push(0.0f32);
                }
            }
        }
    }

    let device = scores.tensor().device();
    let index = Tensor::<R>::from_slice(&index, &[1, 1, q_len, key_len], device)
        .broadcast_to(&[batch, heads, q_len, key_len])
        .map_err(Error::Numr)?
        .contiguous();
    let shifted = var_gather(scores, 3, &index, client).map_err(Error::Numr)?;

    if keep.iter().all(|&k| k == 1.0) {
        return Ok(shifted);
    }
    let keep = Var::new(
        Tensor::<R>::from_slice(&keep, &[1, 1, q_len, key_len], device),
        false,
    );
    var_mul(&shifted, &keep, client).map_err(Error::Numr)
}

/// Relative attention probabilities: `[B, H, Q, K]`, rows summing to 1 over
/// every unmasked key.
pub fn relative_attention_weights_impl<R, C>(
    client: &C,
    input: &RelativeScoreInput<'_, R>,
) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + TensorOps<R> + ScalarOps<R> + IndexingOps<R>,
    R::Client: TensorOps<R> + ScalarOps<R> + IndexingOps<R>,
{
    let q_shape = input.q.shape().to_vec();
    let k_shape = input.k.shape().to_vec();
    let r_shape = input.r.shape().to_vec();

    for (arg, shape) in [("q", &q_shape), ("k", &k_shape), ("r", &r_shape)] {
        if shape.len() != 4 {
            return Err(Error::shape(
                arg,
                format!("expected 4D [B, H, S, D], got {}D", shape.len()),
            ));
        }
    }
    let [batch, heads, _, head_dim] = [q_shape[0], q_shape[1], q_shape[2], q_shape[3]];
    if k_shape[0] != batch || k_shape[1] != heads || k_shape[3] != head_dim {
        return Err(Error::shape(
            "k",
            format!("q is {q_shape:?} but k is {k_shape:?} (B, H, D must match)"),
        ));
    }
    if r_shape[0] != batch || r_shape[1] != heads || r_shape[3] != head_dim {
        return Err(Error::shape(
            "r",
            format!("q is {q_shape:?} but r is {r_shape:?} (B, H, D must match)"),
        ));
    }
    for (arg, bias) in [
        ("content_bias", input.content_bias),
        ("position_bias", input.position_bias),
    ] {
        if bias.shape() != &[heads, head_dim] {
            return Err(Error::shape(
                arg,
                format!("expected [{heads}, {head_dim}], got {:?}", bias.shape()),
            ));
        }
    }
    let key_len = k_shape[2];
    let scale = (head_dim as f64).sqrt().recip();

    // Content term: (q + u) @ k^T → [B, H, Q, K]
    let u = var_reshape(input.content_bias, &[1, heads, 1, head_dim]).map_err(Error::Numr)?;
    let q_u = var_add(input.q, &u, client).map_err(Error::Numr)?;
    let k_t = var_transpose(input.k).map_err(Error::Numr)?;
    let content = var_matmul(&q_u, &k_t, client).map_err(Error::Numr)?;

    // Position term: (q + v) @ r^T → [B, H, Q, L] → shift → [B, H, Q, K]
    let v = var_reshape(input.position_bias, &[1, heads, 1, head_dim]).map_err(Error::Numr)?;
    let q_v = var_add(input.q, &v, client).map_err(Error::Numr)?;
    let r_t = var_transpose(input.r).map_err(Error::Numr)?;
    let position = var_matmul(&q_v, &r_t, client).map_err(Error::Numr)?;
    let position = relative_shift_impl(client, &position, key_len)?;

    let scores = var_add(&content, &position, client).map_err(Error::Numr)?;
    let scores = var_mul_scalar(&scores, scale, client).map_err(Error::Numr)?;
    log::trace!("relative attention scores {:?}", scores.shape());

    let scores = match input.mask {
        Some(mask) => var_add(&scores, mask, client).map_err(Error::Numr)?,
        None => scores,
    };

    var_softmax(&scores, -1, client).map_err(Error::Numr)
}
