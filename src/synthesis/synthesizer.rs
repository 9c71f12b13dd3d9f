//! Answer synthesis: prompt, one generation call, citation extraction.

use serde::Serialize;
use std::sync::Arc;

use super::prompt::{build_prompt, cited_indices};
use crate::documents::ChunkId;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::providers::GenerationProvider;
use crate::retry::RetryPolicy;
use crate::vector::ScoredChunk;

/// Result of `ask`.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Chunks the answer relies on, in citation order.
    pub cited_chunk_ids: Vec<ChunkId>,
    /// Everything handed to the generator, best first.
    pub context: Vec<ScoredChunk>,
}

impl Answer {
    /// No relevant context was found.
    pub fn is_ungrounded(&self) -> bool {
        self.context.is_empty()
    }
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn GenerationProvider>,
    policy: RetryPolicy,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn GenerationProvider>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    pub fn provider_name(&self) -> &str {
        self.generator.name()
    }

    /// Generate an answer to `query` grounded in `context`.
    ///
    /// Citations are taken from `[n]` markers in the generated text. When the
    /// generator emits none, every context chunk counts as cited.
    pub async fn synthesize(
        &self,
        query: &str,
        context: Vec<ScoredChunk>,
    ) -> KnowledgeResult<Answer> {
        let prompt = build_prompt(query, &context);
        let label = format!("generation ({})", self.generator.name());

        let text = self
            .policy
            .run(&label, |_| self.generator.generate(&prompt))
            .await
            .map_err(|exhausted| {
                if exhausted.all_timed_out {
                    KnowledgeError::ProviderTimeout {
                        provider: self.generator.name().to_string(),
                        timeout_ms: self.policy.timeout().as_millis() as u64,
                    }
                } else {
                    KnowledgeError::GenerationUnavailable(exhausted.last.to_string())
                }
            })?;

        let cited_chunk_ids = if context.is_empty() {
            Vec::new()
        } else {
            let indices = cited_indices(&text, context.len());
            if indices.is_empty() {
                context.iter().map(|c| c.chunk_id.clone()).collect()
            } else {
                indices
                    .into_iter()
                    .map(|n| context[n - 1].chunk_id.clone())
                    .collect()
            }
        };

        tracing::debug!(
            target: "synthesis",
            "Answer from {} cites {}/{} chunk(s)",
            self.generator.name(),
            cited_chunk_ids.len(),
            context.len()
        );

        Ok(Answer {
            text: text.trim().to_string(),
            cited_chunk_ids,
            context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentId;
    use crate::providers::{ExtractiveGenerator, ProviderError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixed(Result<String, ProviderError>);

    #[async_trait]
    impl GenerationProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            self.0.clone()
        }
    }

    struct Stalled;

    #[async_trait]
    impl GenerationProvider for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    fn chunk(offset: usize, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk_id: ChunkId::new(DocumentId::new("doc").unwrap(), offset),
            score: 0.7,
            text: text.to_string(),
        }
    }

    fn synthesizer(generator: impl GenerationProvider + 'static) -> AnswerSynthesizer {
        AnswerSynthesizer::new(
            Arc::new(generator),
            RetryPolicy::single_attempt(Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn test_citations_follow_markers() {
        let synth = synthesizer(Fixed(Ok("Green [2].".to_string())));
        let answer = synth
            .synthesize("color?", vec![chunk(0, "sky blue"), chunk(10, "grass green")])
            .await
            .unwrap();

        assert_eq!(answer.text, "Green [2].");
        assert_eq!(answer.cited_chunk_ids, vec![answer.context[1].chunk_id.clone()]);
    }

    #[tokio::test]
    async fn test_unmarked_answer_cites_all_context() {
        let synth = synthesizer(Fixed(Ok("It is blue.".to_string())));
        let answer = synth
            .synthesize("color?", vec![chunk(0, "sky blue"), chunk(10, "grass green")])
            .await
            .unwrap();
        assert_eq!(answer.cited_chunk_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_context_has_no_citations() {
        let synth = synthesizer(ExtractiveGenerator::new());
        let answer = synth.synthesize("anything?", Vec::new()).await.unwrap();

        assert!(answer.is_ungrounded());
        assert!(answer.cited_chunk_ids.is_empty());
        assert!(!answer.text.is_empty());
    }

    #[tokio::test]
    async fn test_failure_maps_to_generation_unavailable() {
        let synth = synthesizer(Fixed(Err(ProviderError::Unavailable("503".into()))));
        let err = synth.synthesize("q", vec![chunk(0, "x")]).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::GenerationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_provider_timeout() {
        let synth = synthesizer(Stalled);
        let err = synth.synthesize("q", vec![chunk(0, "x")]).await.unwrap_err();
        assert!(matches!(
            err,
            KnowledgeError::ProviderTimeout { timeout_ms: 50, .. }
        ));
    }
}
