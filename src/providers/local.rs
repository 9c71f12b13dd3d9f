//! Local ONNX embeddings through fastembed.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use std::sync::Arc;

use super::{EmbeddingProvider, ProviderError};

const MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// AllMiniLML6V2 running in-process.
///
/// The model downloads on first use. Inference is CPU-bound, so each batch
/// runs on the blocking pool.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
    max_input_chars: usize,
}

impl FastEmbedProvider {
    pub fn new(max_input_chars: usize) -> Result<Self, ProviderError> {
        let mut model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
        )
        .map_err(|e| ProviderError::NotConfigured(format!("failed to load model: {e}")))?;

        // Get dimensions by generating a test embedding
        let dimension = model
            .embed(vec!["test"], None)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?
            .into_iter()
            .next()
            .map(|v| v.len())
            .ok_or_else(|| ProviderError::InvalidResponse("empty probe embedding".to_string()))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimension,
            max_input_chars,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        "fastembed"
    }

    fn model(&self) -> &str {
        MODEL_NAME
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || model.lock().embed(texts, None))
            .await
            .map_err(|e| ProviderError::Unavailable(format!("embedding task failed: {e}")))?
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}
