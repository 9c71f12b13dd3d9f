//! Deterministic offline embedder.
//!
//! Feature hashing over lower-cased word tokens: each token lands in one of
//! `dimension` buckets with a hash-derived sign, and the result is scaled to
//! unit length. Texts that share words score high under cosine similarity.
//! No model download and no network, which makes it the default backend and
//! the one tests run against.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{EmbeddingProvider, ProviderError};
use crate::vector::normalize;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    max_input_chars: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize, max_input_chars: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            max_input_chars,
        }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        normalize(&mut vector);
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}
