//! Embedding gateway.
//!
//! Sits between the service and whichever [`EmbeddingProvider`] is
//! configured. It enforces the input size limit before any network call,
//! splits work into provider-sized batches, applies the timeout and retry
//! policy, and checks that every returned vector has the configured
//! dimension. Nothing downstream ever sees a vector of the wrong length.

use std::sync::Arc;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::providers::{EmbeddingProvider, ProviderError};
use crate::retry::{RetryExhausted, RetryPolicy};

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    max_batch_size: usize,
    dimension: usize,
}

impl EmbeddingGateway {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        policy: RetryPolicy,
        max_batch_size: usize,
        dimension: usize,
    ) -> Self {
        Self {
            provider,
            policy,
            max_batch_size: max_batch_size.max(1),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Embed `texts`, returning vectors aligned with the input.
    ///
    /// Fails with `InputTooLarge` before calling the provider if any text is
    /// longer than the provider accepts.
    pub async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let limit = self.provider.max_input_chars();
        if let Some(len) = texts
            .iter()
            .map(|t| t.chars().count())
            .find(|len| *len > limit)
        {
            return Err(KnowledgeError::InputTooLarge { len, limit });
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(self.max_batch_size).enumerate() {
            let label = format!(
                "embedding batch {} ({}, {} texts)",
                batch_no + 1,
                self.provider.name(),
                batch.len()
            );
            let batch_vectors = self
                .policy
                .run(&label, |_| self.provider.embed(batch))
                .await
                .map_err(|e| self.exhausted(e))?;

            if batch_vectors.len() != batch.len() {
                return Err(KnowledgeError::EmbeddingUnavailable(format!(
                    "provider returned {} vectors for {} inputs",
                    batch_vectors.len(),
                    batch.len()
                )));
            }
            for vector in &batch_vectors {
                if vector.len() != self.dimension {
                    return Err(KnowledgeError::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
            }
            vectors.extend(batch_vectors);
        }

        tracing::debug!(
            target: "embedding",
            "Embedded {} text(s) with {}",
            vectors.len(),
            self.provider.name()
        );
        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| KnowledgeError::EmbeddingUnavailable("empty response".to_string()))
    }

    fn exhausted(&self, e: RetryExhausted<ProviderError>) -> KnowledgeError {
        if e.all_timed_out {
            KnowledgeError::ProviderTimeout {
                provider: self.provider.name().to_string(),
                timeout_ms: self.policy.timeout().as_millis() as u64,
            }
        } else {
            KnowledgeError::EmbeddingUnavailable(format!(
                "{} after {} attempt(s)",
                e.last, e.attempts
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashingEmbedder;
    use std::time::Duration;

    fn gateway(dimension: usize, max_batch: usize) -> EmbeddingGateway {
        EmbeddingGateway::new(
            Arc::new(HashingEmbedder::new(dimension, 20)),
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_secs(1)),
            max_batch,
            dimension,
        )
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let gateway = gateway(16, 2);
        let texts: Vec<String> = ["a", "b", "c", "a", "e"].iter().map(|s| s.to_string()).collect();

        let vectors = gateway.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[0], vectors[3]);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn test_input_too_large() {
        let gateway = gateway(16, 8);
        let err = gateway
            .embed_batch(&["x".repeat(21)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KnowledgeError::InputTooLarge { len: 21, limit: 20 }
        ));
    }

    #[tokio::test]
    async fn test_dimension_checked() {
        let gateway = EmbeddingGateway::new(
            Arc::new(HashingEmbedder::new(8, 100)),
            RetryPolicy::single_attempt(Duration::from_secs(1)),
            4,
            16,
        );
        let err = gateway.embed_one("hello").await.unwrap_err();
        assert!(matches!(
            err,
            KnowledgeError::DimensionMismatch {
                expected: 16,
                actual: 8
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_call() {
        let gateway = gateway(16, 2);
        assert!(gateway.embed_batch(&[]).await.unwrap().is_empty());
    }
}
