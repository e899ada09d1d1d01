//! Relative multi-head attention over memory + current segment.

use super::config::RelativeAttentionConfig;
use super::mask::AttentionMask;
use crate::error::{Error, Result};
use crate::nn::module::{Module, StateDict, TrainMode, prefixed, take_state};
use crate::nn::{Dropout, LayerNorm, Linear, VarBuilder};
use crate::ops::traits::{RelativeAttentionOps, RelativeScoreInput};
use numr::autograd::{
    Var, var_add, var_broadcast_to, var_cat, var_matmul, var_narrow, var_permute, var_reshape,
};
use numr::dtype::DType;
use numr::ops::{BinaryOps, RandomOps, ReduceOps, ScalarOps, ShapeOps, TensorOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;
use std::collections::HashMap;
use std::time::Instant;

/// Bundled inputs for one forward pass.
///
/// - `tokens`: `[B, Q, d_model]`
/// - `relatives`: `[L, d_model]` or `[B, L, d_model]` with `L = M + Q`;
///   row `L - 1` embeds distance 0
/// - `memory`: `[B, M, d_model]`; `None` and `M = 0` are equivalent
/// - `content_bias`, `position_bias`: `[H, D]` or flat `[H * D]`
/// - `mask`: `[Q, M + Q]` or `[B, Q, M + Q]`, `true` = disallowed
pub struct RelativeAttentionInput<'a, R: Runtime> {
    pub tokens: &'a Var<R>,
    pub relatives: &'a Var<R>,
    pub memory: Option<&'a Var<R>>,
    pub content_bias: &'a Var<R>,
    pub position_bias: &'a Var<R>,
    pub mask: Option<&'a AttentionMask>,
}

/// Forward result with the attention probabilities kept for inspection.
pub struct RelativeAttentionOutput<R: Runtime> {
    /// `[B, Q, d_model]`
    pub output: Var<R>,
    /// `[B, H, Q, M + Q]`, before attention dropout
    pub attn_weights: Var<R>,
}

/// Transformer-XL relative multi-head self-attention.
///
/// Keys and values come from `[memory; tokens]`, queries from the trailing
/// `Q` rows of the same projection. Scores combine a content term and a
/// relative-position term before a single softmax over keys.
pub struct RelativeAttention<R: Runtime> {
    q_proj: Linear<R>,
    kv_proj: Linear<R>,
    o_proj: Linear<R>,
    r_proj: Linear<R>,
    layer_norm: Option<LayerNorm<R>>,
    dropout: Dropout,
    attn_dropout: Dropout,
    config: RelativeAttentionConfig,
}

impl<R: Runtime<DType = DType>> RelativeAttention<R> {
    /// Zero-initialized layer (identity layer norm when present).
    pub fn from_config(config: &RelativeAttentionConfig, device: &R::Device) -> Result<Self> {
        config.validate()?;
        let dm = config.d_model;
        let units = config.units();
        let bias = config.use_bias;

        Ok(Self {
            q_proj: Linear::zeros(dm, units, bias, device),
            kv_proj: Linear::zeros(dm, 2 * units, bias, device),
            o_proj: Linear::zeros(units, dm, bias, device),
            r_proj: Linear::zeros(dm, units, bias, device),
            layer_norm: config
                .uses_norm()
                .then(|| LayerNorm::identity(dm, config.norm_eps, device)),
            dropout: Dropout::new(config.dropout)?,
            attn_dropout: Dropout::new(config.attention_dropout)?,
            config: config.clone(),
        })
    }

    /// Build from the ordered kernel list accepted by [`set_weights`](Self::set_weights).
    pub fn from_kernels(
        config: &RelativeAttentionConfig,
        weights: Vec<Tensor<R>>,
        device: &R::Device,
    ) -> Result<Self> {
        let mut layer = Self::from_config(config, device)?;
        layer.set_weights(weights)?;
        Ok(layer)
    }

    /// Load frozen weights via VarBuilder.
    ///
    /// Names: `q_proj`, `kv_proj`, `o_proj`, `r_proj` (each `.weight` in
    /// `[out, in]` layout, `.bias` when `use_bias`), and `layer_norm.weight` /
    /// `layer_norm.bias` when the layer is residual or pre-normalized.
    pub fn from_varbuilder(vb: &mut VarBuilder<R>, config: &RelativeAttentionConfig) -> Result<Self> {
        config.validate()?;
        let dm = config.d_model;
        let units = config.units();

        let q_proj = load_linear(vb, "q_proj", dm, units, config.use_bias)?;
        let kv_proj = load_linear(vb, "kv_proj", dm, 2 * units, config.use_bias)?;
        let o_proj = load_linear(vb, "o_proj", units, dm, config.use_bias)?;
        let r_proj = load_linear(vb, "r_proj", dm, units, config.use_bias)?;

        let layer_norm = if config.uses_norm() {
            let mut ln_vb = vb.pp("layer_norm");
            Some(LayerNorm::new(
                ln_vb.take_with_shape("weight", &[dm])?,
                ln_vb.take_with_shape("bias", &[dm])?,
                config.norm_eps,
                false,
            ))
        } else {
            None
        };

        Ok(Self {
            q_proj,
            kv_proj,
            o_proj,
            r_proj,
            layer_norm,
            dropout: Dropout::new(config.dropout)?,
            attn_dropout: Dropout::new(config.attention_dropout)?,
            config: config.clone(),
        })
    }

    /// Forward pass returning only the updated tokens `[B, Q, d_model]`.
    pub fn forward<C>(&self, client: &C, input: &RelativeAttentionInput<'_, R>) -> Result<Var<R>>
    where
        C: RuntimeClient<R>
            + TensorOps<R>
            + ScalarOps<R>
            + ReduceOps<R>
            + RandomOps<R>
            + BinaryOps<R>
            + ShapeOps<R>
            + RelativeAttentionOps<R>,
        R::Client: TensorOps<R> + ScalarOps<R> + ReduceOps<R> + BinaryOps<R> + ShapeOps<R>,
    {
        Ok(self.forward_with_weights(client, input)?.output)
    }

    /// Forward pass that also returns the attention probabilities.
    pub fn forward_with_weights<C>(
        &self,
        client: &C,
        input: &RelativeAttentionInput<'_, R>,
    ) -> Result<RelativeAttentionOutput<R>>
    where
        C: RuntimeClient<R>
            + TensorOps<R>
            + ScalarOps<R>
            + ReduceOps<R>
            + RandomOps<R>
            + BinaryOps<R>
            + ShapeOps<R>
            + RelativeAttentionOps<R>,
        R::Client: TensorOps<R> + ScalarOps<R> + ReduceOps<R> + BinaryOps<R> + ShapeOps<R>,
    {
        let start = log::log_enabled!(log::Level::Debug).then(Instant::now);
        let dims = self.check_input(input)?;
        let Dims {
            batch,
            q_len,
            mem_len,
            rel_len,
        } = dims;
        let k_len = mem_len + q_len;
        let heads = self.config.num_heads;
        let head_dim = self.config.head_dim;
        let units = self.config.units();

        // Key/value source: [memory; tokens] along the sequence axis
        let source = match input.memory {
            Some(memory) if mem_len > 0 => {
                var_cat(&[memory, input.tokens], 1, client).map_err(Error::Numr)?
            }
            _ => input.tokens.clone(),
        };
        let source = match (&self.layer_norm, self.config.pre_norm) {
            (Some(norm), true) => norm.forward(client, &source)?,
            _ => source,
        };

        // Queries are projected over the whole source and truncated to the
        // trailing q_len rows.
        let q = self.q_proj.forward(client, &source)?;
        let q = var_narrow(&q, 1, mem_len, q_len).map_err(Error::Numr)?;
        let q = var_contiguous(&q);
        let kv = self.kv_proj.forward(client, &source)?;
        let k = var_narrow(&kv, 2, 0, units).map_err(Error::Numr)?;
        let k = var_contiguous(&k);
        let v = var_narrow(&kv, 2, units, units).map_err(Error::Numr)?;
        let v = var_contiguous(&v);

        let r = self.r_proj.forward(client, input.relatives)?;
        let r = if r.shape().len() == 2 {
            let r = var_reshape(&r, &[1, rel_len, units]).map_err(Error::Numr)?;
            let r = var_broadcast_to(&r, &[batch, rel_len, units]).map_err(Error::Numr)?;
            var_contiguous(&r)
        } else {
            r
        };

        let q = self.split_heads(&q, batch, q_len)?;
        let k = self.split_heads(&k, batch, k_len)?;
        let v = self.split_heads(&v, batch, k_len)?;
        let r = self.split_heads(&r, batch, rel_len)?;

        let content_bias = head_bias(input.content_bias, "content_bias", heads, head_dim)?;
        let position_bias = head_bias(input.position_bias, "position_bias", heads, head_dim)?;

        let device = input.tokens.tensor().device();
        let mask = match input.mask {
            Some(mask) => mask
                .to_additive::<R>(batch, q_len, k_len, input.tokens.tensor().dtype(), device)?
                .map(|t| Var::new(t, false)),
            None => None,
        };

        let probs = client.relative_attention_weights(&RelativeScoreInput {
            q: &q,
            k: &k,
            r: &r,
            content_bias: &content_bias,
            position_bias: &position_bias,
            mask: mask.as_ref(),
        })?;
        let attn = self.attn_dropout.forward(client, &probs)?;

        // [B, H, Q, K] @ [B, H, K, D] → [B, H, Q, D] → [B, Q, H*D]
        let context = var_matmul(&attn, &v, client).map_err(Error::Numr)?;
        let context = var_permute(&context, &[0, 2, 1, 3]).map_err(Error::Numr)?;
        let context = var_contiguous(&context);
        let context = var_reshape(&context, &[batch, q_len, units]).map_err(Error::Numr)?;

        let mut output = self.o_proj.forward(client, &context)?;
        if self.config.residual {
            output = self.dropout.forward(client, &output)?;
            output = var_add(input.tokens, &output, client).map_err(Error::Numr)?;
            if !self.config.pre_norm {
                if let Some(norm) = &self.layer_norm {
                    output = norm.forward(client, &output)?;
                }
            }
        }

        if let Some(start) = start {
            log::debug!(
                "relative attention: batch={batch} q_len={q_len} mem_len={mem_len} heads={heads} masked={} in {:?}",
                mask.is_some(),
                start.elapsed()
            );
        }

        Ok(RelativeAttentionOutput {
            output,
            attn_weights: probs,
        })
    }
}

impl<R: Runtime> RelativeAttention<R> {
    /// Ordered parameters, kernels in `[in, out]` layout:
    /// `kernel_q, [bias_q], kernel_kv, [bias_kv], kernel_o, [bias_o], kernel_r, [bias_r]`,
    /// followed by `norm_weight, norm_bias` when the layer owns a layer norm.
    pub fn weights(&self) -> Result<Vec<Tensor<R>>> {
        let mut out = Vec::with_capacity(10);
        for proj in [&self.q_proj, &self.kv_proj, &self.o_proj, &self.r_proj] {
            out.push(proj.kernel()?);
            if let Some(b) = proj.bias() {
                out.push(b.tensor().clone());
            }
        }
        if let Some(norm) = &self.layer_norm {
            out.push(norm.weight().tensor().clone());
            out.push(norm.bias().tensor().clone());
        }
        Ok(out)
    }

    /// Replace every parameter from a list ordered as in [`weights`](Self::weights).
    pub fn set_weights(&mut self, weights: Vec<Tensor<R>>) -> Result<()> {
        let dm = self.config.d_model;
        let units = self.config.units();
        let use_bias = self.config.use_bias;
        let expected = 4 * (1 + use_bias as usize) + 2 * self.layer_norm.is_some() as usize;
        if weights.len() != expected {
            return Err(Error::shape(
                "weights",
                format!("expected {expected} tensors, got {}", weights.len()),
            ));
        }
        let trainable = self.q_proj.weight().requires_grad();
        let mut it = weights.into_iter();

        let q_proj = next_kernel(&mut it, "kernel_q", dm, units, use_bias, trainable)?;
        let kv_proj = next_kernel(&mut it, "kernel_kv", dm, 2 * units, use_bias, trainable)?;
        let o_proj = next_kernel(&mut it, "kernel_o", units, dm, use_bias, trainable)?;
        let r_proj = next_kernel(&mut it, "kernel_r", dm, units, use_bias, trainable)?;
        let layer_norm = match &self.layer_norm {
            Some(norm) => {
                let weight = next_with_shape(&mut it, "norm_weight", &[dm])?;
                let bias = next_with_shape(&mut it, "norm_bias", &[dm])?;
                Some(LayerNorm::new(weight, bias, norm.eps() as f32, trainable))
            }
            None => None,
        };

        self.q_proj = q_proj;
        self.kv_proj = kv_proj;
        self.o_proj = o_proj;
        self.r_proj = r_proj;
        self.layer_norm = layer_norm;
        Ok(())
    }

    pub fn config(&self) -> &RelativeAttentionConfig {
        &self.config
    }

    pub fn num_heads(&self) -> usize {
        self.config.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.config.head_dim
    }

    fn check_input(&self, input: &RelativeAttentionInput<'_, R>) -> Result<Dims> {
        let dm = self.config.d_model;
        let tokens = input.tokens.shape();
        if tokens.len() != 3 || tokens[2] != dm {
            return Err(Error::shape(
                "tokens",
                format!("expected [B, Q, {dm}], got {tokens:?}"),
            ));
        }
        let (batch, q_len) = (tokens[0], tokens[1]);
        if q_len == 0 {
            return Err(Error::shape("tokens", "query length must be > 0"));
        }

        let mem_len = match input.memory {
            Some(memory) => {
                let shape = memory.shape();
                if shape.len() != 3 || shape[0] != batch || shape[2] != dm {
                    return Err(Error::shape(
                        "memory",
                        format!("expected [{batch}, M, {dm}], got {shape:?}"),
                    ));
                }
                shape[1]
            }
            None => 0,
        };

        let rel = input.relatives.shape();
        let rel_len = match rel {
            &[len, d] if d == dm => len,
            &[b, len, d] if b == batch && d == dm => len,
            _ => {
                return Err(Error::shape(
                    "relatives",
                    format!("expected [L, {dm}] or [{batch}, L, {dm}], got {rel:?}"),
                ));
            }
        };
        if rel_len != mem_len + q_len {
            return Err(Error::shape(
                "relatives",
                format!(
                    "length {rel_len} must equal memory length {mem_len} + query length {q_len}"
                ),
            ));
        }

        Ok(Dims {
            batch,
            q_len,
            mem_len,
            rel_len,
        })
    }

    /// `[B, S, H*D]` → `[B, H, S, D]`
    fn split_heads(&self, x: &Var<R>, batch: usize, len: usize) -> Result<Var<R>> {
        let x = var_reshape(
            x,
            &[batch, len, self.config.num_heads, self.config.head_dim],
        )
        .map_err(Error::Numr)?;
        let x = var_permute(&x, &[0, 2, 1, 3]).map_err(Error::Numr)?;
        Ok(var_contiguous(&x))
    }
}

impl<R: Runtime> Module<R> for RelativeAttention<R> {
    fn parameters(&self) -> Vec<&Var<R>> {
        self.named_parameters().into_iter().map(|(_, v)| v).collect()
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = prefixed("q_proj", self.q_proj.named_parameters());
        params.extend(prefixed("kv_proj", self.kv_proj.named_parameters()));
        params.extend(prefixed("o_proj", self.o_proj.named_parameters()));
        params.extend(prefixed("r_proj", self.r_proj.named_parameters()));
        if let Some(norm) = &self.layer_norm {
            params.extend(prefixed("layer_norm", norm.named_parameters()));
        }
        params
    }
}

impl<R: Runtime> StateDict<R> for RelativeAttention<R> {
    fn load_state_dict(&mut self, state: &HashMap<String, Tensor<R>>) -> Result<()> {
        let dm = self.config.d_model;
        let units = self.config.units();
        let use_bias = self.config.use_bias;
        let trainable = self.q_proj.weight().requires_grad();

        let linear = |name: &str, in_f: usize, out_f: usize| -> Result<Linear<R>> {
            let weight = take_state(state, &format!("{name}.weight"), &[out_f, in_f])?;
            let bias = if use_bias {
                Some(take_state(state, &format!("{name}.bias"), &[out_f])?)
            } else {
                None
            };
            Ok(Linear::new(weight, bias, trainable))
        };
        let q_proj = linear("q_proj", dm, units)?;
        let kv_proj = linear("kv_proj", dm, 2 * units)?;
        let o_proj = linear("o_proj", units, dm)?;
        let r_proj = linear("r_proj", dm, units)?;
        let layer_norm = match &self.layer_norm {
            Some(norm) => Some(LayerNorm::new(
                take_state(state, "layer_norm.weight", &[dm])?,
                take_state(state, "layer_norm.bias", &[dm])?,
                norm.eps() as f32,
                trainable,
            )),
            None => None,
        };

        self.q_proj = q_proj;
        self.kv_proj = kv_proj;
        self.o_proj = o_proj;
        self.r_proj = r_proj;
        self.layer_norm = layer_norm;
        Ok(())
    }
}

impl<R: Runtime> TrainMode for RelativeAttention<R> {
    fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
        self.attn_dropout.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.dropout.is_training()
    }
}

struct Dims {
    batch: usize,
    q_len: usize,
    mem_len: usize,
    rel_len: usize,
}

/// Accept `[H, D]` or flat `[H * D]` biases.
fn head_bias<R: Runtime>(
    bias: &Var<R>,
    arg: &'static str,
    heads: usize,
    head_dim: usize,
) -> Result<Var<R>> {
    match bias.shape() {
        &[h, d] if h == heads && d == head_dim => Ok(bias.clone()),
        &[n] if n == heads * head_dim => {
            var_reshape(bias, &[heads, head_dim]).map_err(Error::Numr)
        }
        other => Err(Error::shape(
            arg,
            format!(
                "expected [{heads}, {head_dim}] or [{}], got {other:?}",
                heads * head_dim
            ),
        )),
    }
}

fn load_linear<R: Runtime>(
    vb: &mut VarBuilder<R>,
    name: &str,
    in_features: usize,
    out_features: usize,
    use_bias: bool,
) -> Result<Linear<R>> {
    let mut vb = vb.pp(name);
    let weight = vb.take_with_shape("weight", &[out_features, in_features])?;
    let bias = vb.take_optional("bias", &[out_features])?;
    match (use_bias, bias.is_some()) {
        (true, false) => Err(Error::ModelError {
            reason: format!("missing '{}.bias' (use_bias = true)", vb.prefix()),
        }),
        (false, true) => Err(Error::ModelError {
            reason: format!("unexpected '{}.bias' (use_bias = false)", vb.prefix()),
        }),
        _ => Ok(Linear::new(weight, bias, false)),
    }
}

fn next_with_shape<R: Runtime>(
    it: &mut impl Iterator<Item = Tensor<R>>,
    arg: &'static str,
    expected: &[usize],
) -> Result<Tensor<R>> {
    let t = it
        .next()
        .ok_or_else(|| Error::shape(arg, "missing from weight list"))?;
    if t.shape() != expected {
        return Err(Error::shape(
            arg,
            format!("expected {expected:?}, got {:?}", t.shape()),
        ));
    }
    Ok(t)
}

fn next_kernel<R: Runtime>(
    it: &mut impl Iterator<Item = Tensor<R>>,
    arg: &'static str,
    in_features: usize,
    out_features: usize,
    use_bias: bool,
    trainable: bool,
) -> Result<Linear<R>> {
    let kernel = next_with_shape(it, arg, &[in_features, out_features])?;
    let bias = if use_bias {
        Some(next_with_shape(it, arg, &[out_features])?)
    } else {
        None
    };
    Linear::from_kernel(&kernel, bias, trainable)
}

/// Make a Var contiguous (copies data if non-contiguous layout).
fn var_contiguous<R: Runtime>(v: &Var<R>) -> Var<R> {
    Var::new(v.tensor().contiguous(), v.requires_grad())
}
