//! Query-time retrieval: embed the question, search the index, filter.

use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::EmbeddingGateway;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::vector::{ScoredChunk, VectorIndex};

pub struct Retriever {
    gateway: Arc<EmbeddingGateway>,
    index: Arc<VectorIndex>,
    overfetch: usize,
}

impl Retriever {
    pub fn new(gateway: Arc<EmbeddingGateway>, index: Arc<VectorIndex>, overfetch: usize) -> Self {
        Self {
            gateway,
            index,
            overfetch: overfetch.max(1),
        }
    }

    /// Up to `k` chunks relevant to `query`, best first.
    ///
    /// Chunks scoring below `min_score` are dropped, so the result may be
    /// shorter than `k` or empty. An empty index returns no chunks without
    /// calling the embedding provider.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        min_score: f32,
    ) -> KnowledgeResult<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Err(KnowledgeError::InvalidInput("query is empty".to_string()));
        }
        if k == 0 {
            return Err(KnowledgeError::InvalidInput(
                "k must be greater than zero".to_string(),
            ));
        }
        if self.index.is_empty() {
            tracing::debug!(target: "retrieve", "Index is empty; skipping query embedding");
            return Ok(Vec::new());
        }

        let query_vector = self.gateway.embed_one(query).await?;
        let candidates = self
            .index
            .query(&query_vector, k.saturating_mul(self.overfetch))?;
        let fetched = candidates.len();

        let mut seen = HashSet::new();
        let results: Vec<ScoredChunk> = candidates
            .into_iter()
            .filter(|c| c.score >= min_score)
            .filter(|c| seen.insert(c.chunk_id.clone()))
            .take(k)
            .collect();

        tracing::debug!(
            target: "retrieve",
            "Query matched {} of {fetched} candidate(s) (k={k}, min_score={min_score})",
            results.len()
        );
        Ok(results)
    }
}
