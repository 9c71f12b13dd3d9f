//! Knowledge service: the public facade over ingestion, retrieval and answers.
//!
//! Ingestion of one document runs the state machine
//! `pending -> {indexed | failed}`:
//!
//! 1. record the text as `pending` (durable)
//! 2. chunk
//! 3. embed every chunk
//! 4. attach chunks with embeddings to the record
//! 5. swap the document's entries into the vector index
//! 6. commit `indexed` (durable)
//!
//! Any failure after step 1 removes the document's index entries and marks
//! it `failed` with a reason, keeping the text. The same happens when the
//! ingestion future is dropped mid-way; see [`IngestGuard`].
//!
//! Ingestion and deletion are serialized per document id and share a
//! service-wide gate that `rebuild_index` and `clear` take exclusively, so
//! a rebuild never snapshots a document halfway through ingestion. Queries
//! take neither; the index itself guarantees they see either all of a
//! document's chunks or none of them.
//!
//! A record write that fails leaves memory and index as they were before
//! the operation, matching what is still on disk.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Settings;
use crate::documents::{
    BoundaryChunker, Chunk, ChunkId, Chunker, Document, DocumentId, DocumentStatus,
    DocumentStore, DocumentSummary, clean_markdown,
};
use crate::embedding::EmbeddingGateway;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::providers::{
    EmbeddingProvider, GenerationProvider, build_embedding_provider, build_generation_provider,
};
use crate::retrieve::Retriever;
use crate::synthesis::{Answer, AnswerSynthesizer};
use crate::vector::{VectorEntry, VectorIndex};
use crate::{debug_event, log_event};

/// Failure reason recorded when an ingestion is abandoned mid-way.
pub const CANCELLED_REASON: &str = "ingestion was cancelled before completion";

/// Result of an ingestion attempt.
///
/// Ingestion failures are reported here rather than as `Err`: the document
/// exists (with its text) and `failure_reason` says what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddOutcome {
    pub document_id: DocumentId,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub failure_reason: Option<String>,
}

impl AddOutcome {
    pub fn is_indexed(&self) -> bool {
        self.status == DocumentStatus::Indexed
    }
}

/// Read-only aggregate over the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeBaseStatus {
    pub document_count: usize,
    pub indexed_count: usize,
    pub pending_count: usize,
    pub failed_count: usize,
    /// Chunks of indexed documents.
    pub chunk_count: usize,
    /// Entries currently in the vector index.
    pub vector_count: usize,
    /// UNIX seconds of the most recent successful ingestion.
    pub last_ingest_at: Option<u64>,
}

pub struct KnowledgeService {
    settings: Settings,
    store: Arc<DocumentStore>,
    index: Arc<VectorIndex>,
    chunker: Box<dyn Chunker>,
    gateway: Arc<EmbeddingGateway>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    /// Serializes ingestion and deletion per document id.
    ingest_locks: DashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>,
    /// Shared by per-document writers, exclusive for whole-base maintenance.
    maintenance_gate: tokio::sync::RwLock<()>,
}

impl KnowledgeService {
    /// Open the knowledge base under `settings.data_dir` with the given providers.
    ///
    /// The vector index is rebuilt from the stored embeddings of every
    /// indexed document.
    pub async fn open(
        settings: Settings,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> KnowledgeResult<Self> {
        settings.validate().map_err(KnowledgeError::InvalidInput)?;

        let dimension = settings.embedding.dimension;
        let metric = settings.embedding.similarity_metric;
        if embedder.dimension() != dimension {
            return Err(KnowledgeError::DimensionMismatch {
                expected: dimension,
                actual: embedder.dimension(),
            });
        }

        let store = Arc::new(
            DocumentStore::open(&settings.data_dir, dimension, metric, embedder.model()).await?,
        );
        let index = Arc::new(VectorIndex::new(dimension, metric));
        let vectors = index.rebuild(store.indexed_embeddings())?;

        let gateway = Arc::new(EmbeddingGateway::new(
            embedder,
            settings.provider.embedding_policy(),
            settings.embedding.max_batch_size,
            dimension,
        ));
        let retriever = Retriever::new(
            Arc::clone(&gateway),
            Arc::clone(&index),
            settings.retrieval.overfetch,
        );
        let synthesizer =
            AnswerSynthesizer::new(generator, settings.provider.generation_policy());

        log_event!(
            "service",
            "opened",
            "{} documents, {vectors} vectors, embedder={}, generator={}",
            store.len(),
            gateway.provider_name(),
            synthesizer.provider_name()
        );

        Ok(Self {
            settings,
            store,
            index,
            chunker: Box::new(BoundaryChunker::new()),
            gateway,
            retriever,
            synthesizer,
            ingest_locks: DashMap::new(),
            maintenance_gate: tokio::sync::RwLock::new(()),
        })
    }

    /// Open with the providers named in `settings`.
    pub async fn from_settings(settings: Settings) -> KnowledgeResult<Self> {
        let embedder = build_embedding_provider(&settings)
            .map_err(|e| KnowledgeError::InvalidInput(e.to_string()))?;
        let generator = build_generation_provider(&settings)
            .map_err(|e| KnowledgeError::InvalidInput(e.to_string()))?;
        Self::open(settings, embedder, generator).await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ---- ingestion ----

    /// Ingest `text` under an id derived from its content.
    pub async fn add_document(&self, text: &str) -> KnowledgeResult<AddOutcome> {
        let text = self.prepare_text(text)?;
        let id = DocumentId::from_content(&text);
        self.ingest(id, text, false).await
    }

    /// Ingest `text` under a caller-chosen id.
    ///
    /// With `overwrite`, an existing document of that id is replaced: its
    /// vectors leave the index before the new text is recorded.
    pub async fn add_named_document(
        &self,
        id: &str,
        text: &str,
        overwrite: bool,
    ) -> KnowledgeResult<AddOutcome> {
        let id = DocumentId::new(id)?;
        let text = self.prepare_text(text)?;
        self.ingest(id, text, overwrite).await
    }

    /// Run ingestion again for a failed document using its stored text.
    pub async fn retry_document(&self, id: &DocumentId) -> KnowledgeResult<AddOutcome> {
        let _shared = self.maintenance_gate.read().await;
        let lock = self.ingest_lock(id);
        let _held = lock.lock().await;

        let previous = self
            .store
            .get_document(id)
            .ok_or_else(|| KnowledgeError::DocumentNotFound(id.clone()))?;
        let text = self.store.stage_retry(id)?;
        self.index.delete_by_document(id);
        let mut guard = IngestGuard::new(&self.store, &self.index, id);
        if let Err(e) = self.store.persist(id).await {
            guard.disarm();
            tracing::warn!(target: "service", "Could not record retry of {id}: {e}");
            self.restore_document(previous);
            return Err(e.into());
        }
        debug_event!("service", "retry", "{id}");

        Ok(self.run_ingestion(id, &text, guard).await)
    }

    fn prepare_text(&self, text: &str) -> KnowledgeResult<String> {
        let text = if self.settings.ingest.clean_markdown {
            clean_markdown(text)
        } else {
            text.to_string()
        };
        if text.trim().is_empty() {
            return Err(KnowledgeError::InvalidInput(
                "document text is empty".to_string(),
            ));
        }
        Ok(text)
    }

    async fn ingest(
        &self,
        id: DocumentId,
        text: String,
        overwrite: bool,
    ) -> KnowledgeResult<AddOutcome> {
        let _shared = self.maintenance_gate.read().await;
        let lock = self.ingest_lock(&id);
        let _held = lock.lock().await;

        if !overwrite && self.store.contains(&id) {
            return Err(KnowledgeError::DuplicateDocument(id));
        }
        if overwrite {
            self.index.delete_by_document(&id);
        }
        let previous = self.store.stage_put(&id, text.clone(), overwrite)?;
        let mut guard = IngestGuard::new(&self.store, &self.index, &id);
        if let Err(e) = self.store.persist(&id).await {
            guard.disarm();
            tracing::warn!(target: "service", "Could not record {id}: {e}");
            match previous {
                Some(doc) => self.restore_document(doc),
                None => {
                    let _ = self.store.stage_remove(&id);
                }
            }
            return Err(e.into());
        }
        if previous.is_some() {
            debug_event!("service", "replacing", "{id}");
        }

        Ok(self.run_ingestion(&id, &text, guard).await)
    }

    /// Drive a recorded pending document to a terminal state.
    async fn run_ingestion(
        &self,
        id: &DocumentId,
        text: &str,
        mut guard: IngestGuard<'_>,
    ) -> AddOutcome {
        let result = self.index_chunks(id, text).await;

        let result = match result {
            Ok(count) => {
                guard.disarm();
                match self.store.persist(id).await {
                    Ok(()) => Ok(count),
                    Err(e) => Err(KnowledgeError::from(e)),
                }
            }
            Err(e) => {
                guard.disarm();
                Err(e)
            }
        };

        match result {
            Ok(chunk_count) => {
                log_event!("service", "indexed", "{id} ({chunk_count} chunks)");
                AddOutcome {
                    document_id: id.clone(),
                    status: DocumentStatus::Indexed,
                    chunk_count,
                    failure_reason: None,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(target: "service", "Ingestion of {id} failed: {reason}");

                self.index.delete_by_document(id);
                let chunk_count = match self.store.stage_failed(id, &reason) {
                    Ok(()) => self
                        .store
                        .get_document(id)
                        .map_or(0, |doc| doc.chunks.len()),
                    Err(_) => 0,
                };
                if let Err(e) = self.store.persist(id).await {
                    tracing::error!(target: "service", "Could not record failure of {id}: {e}");
                }

                AddOutcome {
                    document_id: id.clone(),
                    status: DocumentStatus::Failed,
                    chunk_count,
                    failure_reason: Some(reason),
                }
            }
        }
    }

    /// Steps 2-5 plus the in-memory commit. Returns the chunk count.
    async fn index_chunks(&self, id: &DocumentId, text: &str) -> KnowledgeResult<usize> {
        let raw = self.chunker.chunk(text, &self.settings.chunking)?;
        let texts: Vec<String> = raw.iter().map(|c| c.content.clone()).collect();
        let vectors = self.gateway.embed_batch(&texts).await?;

        let mut chunks = Vec::with_capacity(raw.len());
        let mut entries = Vec::with_capacity(raw.len());
        for (raw, vector) in raw.into_iter().zip(vectors) {
            let chunk_id = ChunkId::new(id.clone(), raw.start_offset);
            entries.push(VectorEntry {
                chunk_id: chunk_id.clone(),
                vector: vector.clone(),
                text: raw.content.clone(),
            });
            chunks.push(Chunk {
                id: chunk_id,
                text: raw.content,
                start_offset: raw.start_offset,
                end_offset: raw.end_offset,
                embedding: Some(vector),
            });
        }

        let count = chunks.len();
        self.store.stage_chunks(id, chunks)?;
        self.index.replace_document(id, entries)?;
        self.store.stage_indexed(id)?;
        Ok(count)
    }

    fn ingest_lock(&self, id: &DocumentId) -> Arc<tokio::sync::Mutex<()>> {
        self.ingest_locks.entry(id.clone()).or_default().clone()
    }

    /// Put `doc` back in the store and, if it was indexed, its vectors back
    /// in the index.
    fn restore_document(&self, doc: Document) {
        let id = doc.id.clone();
        let entries: Vec<VectorEntry> = if doc.status == DocumentStatus::Indexed {
            doc.chunks
                .iter()
                .filter_map(|chunk| {
                    chunk.embedding.as_ref().map(|vector| VectorEntry {
                        chunk_id: chunk.id.clone(),
                        vector: vector.clone(),
                        text: chunk.text.clone(),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        self.store.stage_restore(doc);
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.index.replace_document(&id, entries) {
            tracing::error!(target: "service", "Could not restore vectors of {id}: {e}");
        }
    }

    // ---- documents ----

    /// Delete a document, its chunks and its vectors.
    pub async fn delete_document(&self, id: &DocumentId) -> KnowledgeResult<DocumentSummary> {
        let _shared = self.maintenance_gate.read().await;
        let lock = self.ingest_lock(id);
        let _held = lock.lock().await;

        if !self.store.contains(id) {
            return Err(KnowledgeError::DocumentNotFound(id.clone()));
        }
        let removed_vectors = self.index.delete_by_document(id);
        let removed = match self.store.delete_document(id).await {
            Ok(doc) => doc,
            Err(e) => {
                // The store put the document back; its vectors follow
                tracing::warn!(target: "service", "Could not delete {id}: {e}");
                if let Some(doc) = self.store.get_document(id) {
                    self.restore_document(doc);
                }
                return Err(e.into());
            }
        };

        log_event!("service", "deleted", "{id} ({removed_vectors} vectors)");
        Ok(removed.summary())
    }

    pub fn get_document(&self, id: &DocumentId) -> Option<Document> {
        self.store.get_document(id)
    }

    pub fn list_documents(&self) -> Vec<DocumentSummary> {
        self.store.list_documents()
    }

    // ---- queries ----

    /// Answer `query` with the configured number of context chunks.
    pub async fn ask(&self, query: &str) -> KnowledgeResult<Answer> {
        self.ask_with(query, self.settings.retrieval.k).await
    }

    /// Answer `query` with up to `k` context chunks.
    ///
    /// Finding no relevant context is not an error: the answer says so and
    /// has an empty context.
    pub async fn ask_with(&self, query: &str, k: usize) -> KnowledgeResult<Answer> {
        let context = self
            .retriever
            .retrieve(query, k, self.settings.retrieval.min_score)
            .await?;
        debug_event!("service", "retrieved", "{} chunk(s) for k={k}", context.len());

        self.synthesizer.synthesize(query, context).await
    }

    pub fn status(&self) -> KnowledgeBaseStatus {
        let counts = self.store.snapshot_counts();
        KnowledgeBaseStatus {
            document_count: counts.indexed + counts.pending + counts.failed,
            indexed_count: counts.indexed,
            pending_count: counts.pending,
            failed_count: counts.failed,
            chunk_count: counts.chunks,
            vector_count: self.index.len(),
            last_ingest_at: counts.last_ingest_at,
        }
    }

    // ---- maintenance ----

    /// Rebuild the vector index from the document store.
    ///
    /// Waits for in-flight ingestions and deletions to finish and holds new
    /// ones back until the index is swapped.
    pub async fn rebuild_index(&self) -> KnowledgeResult<usize> {
        let _exclusive = self.maintenance_gate.write().await;
        let count = self.index.rebuild(self.store.indexed_embeddings())?;
        log_event!("service", "rebuilt", "{count} vectors");
        Ok(count)
    }

    /// Remove every document and vector. Returns the number of documents removed.
    pub async fn clear(&self) -> KnowledgeResult<usize> {
        let _exclusive = self.maintenance_gate.write().await;
        self.index.clear();
        let removed = match self.store.clear().await {
            Ok(removed) => removed,
            Err(e) => {
                // Documents whose records survived are back in the store
                tracing::warn!(target: "service", "Clear failed: {e}");
                self.index.rebuild(self.store.indexed_embeddings())?;
                return Err(e.into());
            }
        };
        log_event!("service", "cleared", "{removed} documents");
        Ok(removed)
    }
}

/// Rolls a document back to `failed` if ingestion is abandoned.
///
/// Armed from the moment the pending record is staged until the in-memory
/// commit. Dropping it while armed removes the document's index entries,
/// marks it failed and schedules the durable write on the current runtime.
struct IngestGuard<'a> {
    store: &'a Arc<DocumentStore>,
    index: &'a VectorIndex,
    id: &'a DocumentId,
    armed: bool,
}

impl<'a> IngestGuard<'a> {
    fn new(store: &'a Arc<DocumentStore>, index: &'a VectorIndex, id: &'a DocumentId) -> Self {
        Self {
            store,
            index,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for IngestGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!(target: "service", "Ingestion of {} abandoned; marking failed", self.id);
        self.index.delete_by_document(self.id);
        if self.store.stage_failed(self.id, CANCELLED_REASON).is_err() {
            return;
        }

        // Without a runtime the record stays pending on disk and is marked
        // failed on the next open
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(self.store);
            let id = self.id.clone();
            handle.spawn(async move {
                if let Err(e) = store.persist(&id).await {
                    tracing::error!(target: "service", "Could not record cancellation of {id}: {e}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ExtractiveGenerator, HashingEmbedder};
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.data_dir = dir.path().join("data");
        settings.embedding.dimension = 64;
        settings
    }

    async fn service(dir: &TempDir) -> KnowledgeService {
        KnowledgeService::open(
            settings(dir),
            Arc::new(HashingEmbedder::new(64, 8192)),
            Arc::new(ExtractiveGenerator::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_and_status() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let outcome = service
            .add_document("Rust has ownership. Borrowing follows rules.")
            .await
            .unwrap();
        assert!(outcome.is_indexed());
        assert!(outcome.chunk_count >= 1);

        let status = service.status();
        assert_eq!(status.document_count, 1);
        assert_eq!(status.indexed_count, 1);
        assert_eq!(status.chunk_count, outcome.chunk_count);
        assert_eq!(status.vector_count, outcome.chunk_count);
        assert!(status.last_ingest_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_content_rejected() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        service.add_document("same text").await.unwrap();
        assert!(matches!(
            service.add_document("same text").await,
            Err(KnowledgeError::DuplicateDocument(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_text_rejected_without_record() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        assert!(matches!(
            service.add_document("   \n").await,
            Err(KnowledgeError::InvalidInput(_))
        ));
        assert!(matches!(
            service.add_named_document("bad/id", "text", false).await,
            Err(KnowledgeError::InvalidInput(_))
        ));
        assert_eq!(service.status().document_count, 0);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_vectors() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;
        let id = DocumentId::new("notes").unwrap();

        service
            .add_named_document("notes", "first version of the notes", false)
            .await
            .unwrap();
        let outcome = service
            .add_named_document("notes", "second version", true)
            .await
            .unwrap();

        assert!(outcome.is_indexed());
        let doc = service.get_document(&id).unwrap();
        assert_eq!(doc.source_text, "second version");
        assert_eq!(service.status().vector_count, outcome.chunk_count);
    }

    #[tokio::test]
    async fn test_delete_removes_vectors() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let outcome = service.add_document("delete me soon").await.unwrap();
        service.delete_document(&outcome.document_id).await.unwrap();

        assert_eq!(service.status().vector_count, 0);
        assert!(service.get_document(&outcome.document_id).is_none());
        assert!(matches!(
            service.delete_document(&outcome.document_id).await,
            Err(KnowledgeError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_requires_failed_document() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let outcome = service.add_document("indexed fine").await.unwrap();
        assert!(matches!(
            service.retry_document(&outcome.document_id).await,
            Err(KnowledgeError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_markdown_on_ingest() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir);
        settings.ingest.clean_markdown = true;
        let service = KnowledgeService::open(
            settings,
            Arc::new(HashingEmbedder::new(64, 8192)),
            Arc::new(ExtractiveGenerator::new()),
        )
        .await
        .unwrap();

        let outcome = service
            .add_named_document("doc", "Title line\n\n---\n\nBody text here.", false)
            .await
            .unwrap();
        let doc = service.get_document(&outcome.document_id).unwrap();
        assert!(!doc.source_text.contains("---"));
    }

    #[tokio::test]
    async fn test_provider_dimension_checked_on_open() {
        let dir = TempDir::new().unwrap();
        let result = KnowledgeService::open(
            settings(&dir),
            Arc::new(HashingEmbedder::new(32, 8192)),
            Arc::new(ExtractiveGenerator::new()),
        )
        .await;
        assert!(matches!(
            result,
            Err(KnowledgeError::DimensionMismatch {
                expected: 64,
                actual: 32
            })
        ));
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;
        service.add_document("one document").await.unwrap();
        service.add_document("another document").await.unwrap();

        assert_eq!(service.clear().await.unwrap(), 2);
        assert_eq!(service.status().document_count, 0);
        assert_eq!(service.status().vector_count, 0);
    }
}
