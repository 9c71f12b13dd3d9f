//! Capability providers: embedding and text generation.
//!
//! Both are opaque to the rest of the crate. The service only sees the
//! [`EmbeddingProvider`] and [`GenerationProvider`] traits; which backend sits
//! behind them is decided once, from configuration, by
//! [`build_embedding_provider`] and [`build_generation_provider`].

pub mod extractive;
pub mod hashing;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{EmbeddingBackend, GenerationBackend, Settings};
use crate::retry::Transient;

pub use extractive::ExtractiveGenerator;
pub use hashing::HashingEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedProvider;
pub use openai::{OpenAiChat, OpenAiEmbeddings};

/// Errors a provider call can end with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::Unavailable(_))
    }

    fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout)
    }
}

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &str;

    /// Model identifier, recorded in the store metadata.
    fn model(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Longest single input accepted, in characters.
    fn max_input_chars(&self) -> usize;

    /// Embed `texts`; the result is aligned positionally with the input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Produces text from a prompt.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Build the configured embedding backend.
pub fn build_embedding_provider(
    settings: &Settings,
) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
    let config = &settings.embedding;
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(
            config.dimension,
            config.max_input_chars,
        )),
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbeddings::from_config(config)?),
        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::FastEmbed => Arc::new(FastEmbedProvider::new(config.max_input_chars)?),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::FastEmbed => {
            return Err(ProviderError::NotConfigured(
                "fastembed support requires building with --features local-embeddings"
                    .to_string(),
            ));
        }
    };

    tracing::debug!(
        target: "providers",
        "Embedding provider: {} ({}, dim={})",
        provider.name(),
        provider.model(),
        provider.dimension()
    );
    Ok(provider)
}

/// Build the configured generation backend.
pub fn build_generation_provider(
    settings: &Settings,
) -> Result<Arc<dyn GenerationProvider>, ProviderError> {
    let provider: Arc<dyn GenerationProvider> = match settings.generation.provider {
        GenerationBackend::Extractive => Arc::new(ExtractiveGenerator::new()),
        GenerationBackend::OpenAi => Arc::new(OpenAiChat::from_config(&settings.generation)?),
    };

    tracing::debug!(target: "providers", "Generation provider: {}", provider.name());
    Ok(provider)
}
