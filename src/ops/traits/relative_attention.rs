//! Relative-position attention operations trait

use crate::error::Result;
use numr::autograd::Var;
use numr::runtime::Runtime;

/// Bundled inputs for the relative attention score computation.
///
/// # Layout contract
///
/// - `q`: `[B, H, Q, D]`, queries for the current segment only
/// - `k`: `[B, H, K, D]`, keys over memory + current segment (`K = M + Q`)
/// - `r`: `[B, H, L, D]`, projected relative embeddings, `L >= K`;
///   row `L - 1` is distance 0, row 0 the largest distance
/// - `content_bias`, `position_bias`: `[H, D]`
/// - `mask`: optional, broadcastable to `[B, H, Q, K]`, **additive**
///   (0 for allowed, -inf for disallowed)
pub struct RelativeScoreInput<'a, R: Runtime> {
    pub q: &'a Var<R>,
    pub k: &'a Var<R>,
    pub r: &'a Var<R>,
    pub content_bias: &'a Var<R>,
    pub position_bias: &'a Var<R>,
    pub mask: Option<&'a Var<R>>,
}

/// Relative-position attention (Transformer-XL style).
///
/// Composite ops built from numr primitives. Both use `Var<R>` so the same
/// path serves inference and autograd.
pub trait RelativeAttentionOps<R: Runtime> {
    /// Align offset-indexed scores `[B, H, Q, L]` to key positions
    /// `[B, H, Q, key_len]`.
    ///
    /// Entry `(i, j)` reads offset `(L - key_len) + (Q - 1) - i + j`; pairs whose
    /// offset falls past `L - 1` (keys after the query) are zero.
    fn relative_shift(&self, scores: &Var<R>, key_len: usize) -> Result<Var<R>>;

    /// Attention probabilities `[B, H, Q, K]`:
    /// `softmax(((q + u)·k + shift((q + v)·r)) / sqrt(D) + mask)` over keys.
    fn relative_attention_weights(&self, input: &RelativeScoreInput<'_, R>) -> Result<Var<R>>;
}
