use anyhow::{anyhow, Result};
use std::sync::Mutex;

/// Text to fixed-length vector. Implementations must return vectors of the
/// same dimension for every input.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeds several texts, returning one vector per input in order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

impl EmbeddingProvider for Box<dyn EmbeddingProvider> {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }
}

#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dim: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self { dim: 384 }
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];

        for token in text
            .to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            // FNV-1a
            let mut h: u64 = 1469598103934665603;
            for b in token.as_bytes() {
                h ^= *b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            let idx = (h as usize) % self.dim;
            v[idx] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }

        Ok(v)
    }
}

/// Runs every call of the wrapped provider under a lock, so a model that is
/// not safe for concurrent inference only ever sees one request at a time.
pub struct SerializedProvider<E> {
    inner: Mutex<E>,
}

impl<E: EmbeddingProvider> SerializedProvider<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl<E: EmbeddingProvider> EmbeddingProvider for SerializedProvider<E> {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("embedding provider lock poisoned"))?;
        guard.embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("embedding provider lock poisoned"))?;
        guard.embed_batch(texts)
    }
}

/// Checks that a vector returned by a provider is usable for cosine scoring.
pub(crate) fn validate_embedding(
    v: &[f32],
    expected_dim: Option<usize>,
) -> std::result::Result<(), String> {
    if v.is_empty() {
        return Err("provider returned an empty vector".to_string());
    }
    if let Some(dim) = expected_dim {
        if v.len() != dim {
            return Err(format!(
                "dimension mismatch: expected {dim}, got {}",
                v.len()
            ));
        }
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err("vector contains non-finite values".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedding_is_deterministic_and_normalized() {
        let provider = HashEmbeddingProvider::new(64);
        let a = provider.embed("Where can I track my order?").unwrap();
        let b = provider.embed("Where can I track my order?").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hash_embedding_of_blank_text_is_zero_vector() {
        let provider = HashEmbeddingProvider::new(16);
        let v = provider.embed("   ").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn dimension_has_a_floor() {
        assert_eq!(HashEmbeddingProvider::new(2).dim(), 8);
    }

    #[test]
    fn serialized_provider_forwards_batches() {
        let provider = SerializedProvider::new(HashEmbeddingProvider::new(32));
        let texts = vec!["one".to_string(), "two".to_string()];
        let out = provider.embed_batch(&texts).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], HashEmbeddingProvider::new(32).embed("one").unwrap());
    }

    #[test]
    fn validate_rejects_malformed_vectors() {
        assert!(validate_embedding(&[], None).is_err());
        assert!(validate_embedding(&[1.0, f32::NAN], None).is_err());
        assert!(validate_embedding(&[1.0, 0.0], Some(3)).is_err());
        assert!(validate_embedding(&[1.0, 0.0, 0.0], Some(3)).is_ok());
    }
}
