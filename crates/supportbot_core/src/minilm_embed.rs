//! all-MiniLM-L6-v2 sentence encoder on candle.
//!
//! BERT encoder with post-norm layers, mean pooling over non-padding tokens
//! and L2 normalisation, i.e. the sentence-transformers recipe for this
//! checkpoint. Runs on CPU.

use anyhow::{anyhow, bail, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tokenizers::{Tokenizer, TruncationParams};

use crate::embed::EmbeddingProvider;
use crate::error::SupportBotError;

pub const MINILM_DIMENSION: usize = 384;

/// Longer inputs are cut to this many tokens, matching the checkpoint's
/// sentence-transformers `max_seq_length`.
const MAX_SEQUENCE_TOKENS: usize = 256;

/// Tensor name present in every BERT-style encoder checkpoint.
const BERT_MARKER_TENSOR: &str = "encoder.layer.0.attention.self.query.weight";

struct EncoderShape {
    hidden: usize,
    intermediate: usize,
    heads: usize,
    layers: usize,
    vocab: usize,
    max_positions: usize,
    type_vocab: usize,
    norm_eps: f64,
}

const ALL_MINILM_L6_V2: EncoderShape = EncoderShape {
    hidden: MINILM_DIMENSION,
    intermediate: 1536,
    heads: 12,
    layers: 6,
    vocab: 30522,
    max_positions: 512,
    type_vocab: 2,
    norm_eps: 1e-12,
};

struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    dense: Linear,
    norm: LayerNorm,
    heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, shape: &EncoderShape) -> Result<Self> {
        let h = shape.hidden;
        let self_vb = vb.pp("self");
        let out_vb = vb.pp("output");
        Ok(Self {
            query: candle_nn::linear(h, h, self_vb.pp("query"))?,
            key: candle_nn::linear(h, h, self_vb.pp("key"))?,
            value: candle_nn::linear(h, h, self_vb.pp("value"))?,
            dense: candle_nn::linear(h, h, out_vb.pp("dense"))?,
            norm: candle_nn::layer_norm(h, shape.norm_eps, out_vb.pp("LayerNorm"))?,
            heads: shape.heads,
            head_dim: h / shape.heads,
        })
    }

    fn split_heads(&self, x: &Tensor, batch: usize, seq: usize) -> Result<Tensor> {
        Ok(x.reshape((batch, seq, self.heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// `mask_bias` is (batch, 1, 1, seq): 0 for real tokens, large negative
    /// for padding.
    fn forward(&self, x: &Tensor, mask_bias: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = x.dims3()?;

        let q = self.split_heads(&self.query.forward(x)?, batch, seq)?;
        let k = self.split_heads(&self.key.forward(x)?, batch, seq)?;
        let v = self.split_heads(&self.value.forward(x)?, batch, seq)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q.matmul(&k.t()?)?.affine(scale, 0.0)?;
        let scores = scores.broadcast_add(mask_bias)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, self.heads * self.head_dim))?;

        let out = self.dense.forward(&context)?;
        Ok(self.norm.forward(&(x + out)?)?)
    }
}

struct EncoderLayer {
    attention: Attention,
    up: Linear,
    down: Linear,
    norm: LayerNorm,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, shape: &EncoderShape) -> Result<Self> {
        Ok(Self {
            attention: Attention::load(vb.pp("attention"), shape)?,
            up: candle_nn::linear(
                shape.hidden,
                shape.intermediate,
                vb.pp("intermediate").pp("dense"),
            )?,
            down: candle_nn::linear(
                shape.intermediate,
                shape.hidden,
                vb.pp("output").pp("dense"),
            )?,
            norm: candle_nn::layer_norm(
                shape.hidden,
                shape.norm_eps,
                vb.pp("output").pp("LayerNorm"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor, mask_bias: &Tensor) -> Result<Tensor> {
        let x = self.attention.forward(x, mask_bias)?;
        let h = self.down.forward(&self.up.forward(&x)?.gelu_erf()?)?;
        Ok(self.norm.forward(&(x + h)?)?)
    }
}

struct MiniLmEncoder {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    max_positions: usize,
    device: Device,
}

impl MiniLmEncoder {
    fn load(path: &Path, device: &Device) -> Result<Self> {
        let shape = &ALL_MINILM_L6_V2;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };

        let emb = vb.pp("embeddings");
        let word = candle_nn::embedding(shape.vocab, shape.hidden, emb.pp("word_embeddings"))?;
        let position = candle_nn::embedding(
            shape.max_positions,
            shape.hidden,
            emb.pp("position_embeddings"),
        )?;
        let token_type = candle_nn::embedding(
            shape.type_vocab,
            shape.hidden,
            emb.pp("token_type_embeddings"),
        )?;
        let norm = candle_nn::layer_norm(shape.hidden, shape.norm_eps, emb.pp("LayerNorm"))?;

        let layers = (0..shape.layers)
            .map(|i| EncoderLayer::load(vb.pp("encoder").pp("layer").pp(i), shape))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            word,
            position,
            token_type,
            norm,
            layers,
            max_positions: shape.max_positions,
            device: device.clone(),
        })
    }

    /// Encodes a batch of token sequences into L2-normalised sentence vectors.
    fn encode(&self, sequences: &[TokenizedText]) -> Result<Vec<Vec<f32>>> {
        let batch = sequences.len();
        if batch == 0 {
            return Ok(Vec::new());
        }
        let (ids, mask, seq) = pad_batch(sequences)?;
        if seq > self.max_positions {
            bail!("input length {seq} exceeds max {}", self.max_positions);
        }

        let ids = Tensor::from_vec(ids, (batch, seq), &self.device)?;
        let mask = Tensor::from_vec(mask, (batch, seq), &self.device)?;

        let positions = Tensor::arange(0u32, seq as u32, &self.device)?;
        let token_types = Tensor::zeros((batch, seq), DType::U32, &self.device)?;

        let mut hidden = self
            .word
            .forward(&ids)?
            .broadcast_add(&self.position.forward(&positions)?)?
            .add(&self.token_type.forward(&token_types)?)?;
        hidden = self.norm.forward(&hidden)?;

        let mask_bias = mask.affine(10_000.0, -10_000.0)?.reshape((batch, 1, 1, seq))?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask_bias)?;
        }

        // Mean over real tokens only.
        let token_mask = mask.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&token_mask)?.sum(1)?;
        let counts = token_mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;

        let mut vectors = pooled.to_vec2::<f32>()?;
        for v in &mut vectors {
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                v.iter_mut().for_each(|x| *x /= norm);
            }
        }
        Ok(vectors)
    }
}

struct TokenizedText {
    ids: Vec<u32>,
    attention: Vec<u32>,
}

/// Right-pads every sequence with [PAD] (id 0) to the longest one. The mask
/// follows the tokenizer's attention mask, so pad tokens it already emitted
/// stay out of the mean.
fn pad_batch(sequences: &[TokenizedText]) -> Result<(Vec<u32>, Vec<f32>, usize)> {
    let seq = sequences.iter().map(|s| s.ids.len()).max().unwrap_or(0);
    if seq == 0 {
        bail!("tokenizer produced an empty sequence");
    }

    let mut ids = Vec::with_capacity(sequences.len() * seq);
    let mut mask = Vec::with_capacity(sequences.len() * seq);
    for s in sequences {
        if s.attention.len() != s.ids.len() {
            bail!(
                "attention mask has {} entries for {} tokens",
                s.attention.len(),
                s.ids.len()
            );
        }
        let pad = seq - s.ids.len();
        ids.extend_from_slice(&s.ids);
        ids.extend(std::iter::repeat(0u32).take(pad));
        mask.extend(s.attention.iter().map(|&m| if m > 0 { 1.0f32 } else { 0.0 }));
        mask.extend(std::iter::repeat(0.0f32).take(pad));
    }
    Ok((ids, mask, seq))
}

/// Reads the safetensors JSON header and checks it holds a BERT encoder.
fn ensure_bert_checkpoint(path: &Path) -> Result<()> {
    let mut file = File::open(path)?;

    let mut size_buf = [0u8; 8];
    file.read_exact(&mut size_buf)?;
    let header_size = u64::from_le_bytes(size_buf) as usize;

    // Header JSON is small; cap so a corrupt length can't trigger a huge read.
    let mut header = vec![0u8; header_size.min(10 * 1024 * 1024)];
    file.read_exact(&mut header)?;

    if String::from_utf8_lossy(&header).contains(BERT_MARKER_TENSOR) {
        Ok(())
    } else {
        bail!("{} is not a BERT encoder checkpoint", path.display())
    }
}

pub struct MiniLmEmbeddingProvider {
    encoder: MiniLmEncoder,
    tokenizer: Tokenizer,
}

impl MiniLmEmbeddingProvider {
    /// Loads weights and tokenizer. Any problem with either file is reported
    /// as [`SupportBotError::ModelUnavailable`].
    pub fn load(model_path: &Path, tokenizer_path: &Path) -> crate::error::Result<Self> {
        Self::try_load(model_path, tokenizer_path)
            .map_err(|e| SupportBotError::ModelUnavailable(format!("{e:#}")))
    }

    fn try_load(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        for path in [model_path, tokenizer_path] {
            if !path.is_file() {
                bail!("file not found: {}", path.display());
            }
        }
        ensure_bert_checkpoint(model_path)?;

        let device = Device::Cpu;
        let encoder = MiniLmEncoder::load(model_path, &device)?;
        let mut tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| anyhow!("load tokenizer: {e}"))?;
        // Batches are padded by the encoder; long input is truncated rather
        // than rejected.
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("configure tokenizer: {e}"))?;

        tracing::info!(model = %model_path.display(), "loaded all-MiniLM-L6-v2");
        Ok(Self { encoder, tokenizer })
    }

    pub fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn tokenize(&self, text: &str) -> Result<TokenizedText> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("tokenize: {e}"))?;
        Ok(TokenizedText {
            ids: encoding.get_ids().to_vec(),
            attention: encoding.get_attention_mask().to_vec(),
        })
    }
}

impl EmbeddingProvider for MiniLmEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenize(text)?;
        self.encoder
            .encode(&[tokens])?
            .pop()
            .ok_or_else(|| anyhow!("encoder returned no vector"))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let sequences = texts
            .iter()
            .map(|t| self.tokenize(t))
            .collect::<Result<Vec<_>>>()?;
        self.encoder.encode(&sequences)
    }
}
