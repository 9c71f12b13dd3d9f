//! Durable document store.
//!
//! One versioned JSON record per document under `<data_dir>/documents/`,
//! plus `<data_dir>/store.meta` describing the embedding space. The whole
//! store is mirrored in memory; mutations are staged in memory first and then
//! written with [`DocumentStore::persist`], which always writes the latest
//! in-memory state of a document (temp file + rename).
//!
//! Staging and persisting are separate so the caller can line up index
//! changes with the in-memory commit point.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

use super::metadata::{FORMAT_VERSION, StoreMetadata, VersionProbe};
use super::types::{Chunk, ChunkId, Document, DocumentId, DocumentStatus, DocumentSummary};
use crate::utils::get_utc_timestamp;
use crate::vector::SimilarityMetric;

const DOCUMENTS_DIR: &str = "documents";
const META_FILE: &str = "store.meta";
const RECORD_EXT: &str = "json";

/// Failure reason recorded for documents found pending at startup.
pub const INTERRUPTED_REASON: &str = "ingestion was interrupted before completion";

/// Errors from the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error in {path}: {reason}")]
    Serialization { path: PathBuf, reason: String },

    #[error("Document already exists: {0}")]
    DuplicateDocument(DocumentId),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Unsupported format version {found} in {path} (supported: {supported})")]
    UnsupportedFormat {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("Embedding dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Similarity metric mismatch: store uses {stored}, configuration says {configured}")]
    MetricMismatch {
        stored: SimilarityMetric,
        configured: SimilarityMetric,
    },

    #[error("Corrupt record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Document {id} is {status}: {reason}")]
    InvalidState {
        id: DocumentId,
        status: DocumentStatus,
        reason: &'static str,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// On-disk chunk layout.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    id: ChunkId,
    text: String,
    start_offset: usize,
    end_offset: usize,
    embedding_dim: usize,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

/// On-disk document layout.
#[derive(Debug, Serialize, Deserialize)]
struct DocumentRecord {
    format_version: u32,
    id: DocumentId,
    source_text: String,
    created_at: u64,
    #[serde(default)]
    indexed_at: Option<u64>,
    status: DocumentStatus,
    #[serde(default)]
    failure_reason: Option<String>,
    chunks: Vec<ChunkRecord>,
}

impl DocumentRecord {
    fn from_document(doc: &Document, embedding_dim: usize) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            id: doc.id.clone(),
            source_text: doc.source_text.clone(),
            created_at: doc.created_at,
            indexed_at: doc.indexed_at,
            status: doc.status,
            failure_reason: doc.failure_reason.clone(),
            chunks: doc
                .chunks
                .iter()
                .map(|chunk| ChunkRecord {
                    id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    start_offset: chunk.start_offset,
                    end_offset: chunk.end_offset,
                    embedding_dim,
                    embedding: chunk.embedding.clone(),
                })
                .collect(),
        }
    }

    fn into_document(self, path: &Path, embedding_dim: usize) -> StoreResult<Document> {
        let mut chunks = Vec::with_capacity(self.chunks.len());
        for record in self.chunks {
            if record.id.document_id() != &self.id {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    reason: format!("chunk {} does not belong to {}", record.id, self.id),
                });
            }
            if record.start_offset > record.end_offset {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    reason: format!("chunk {} has an inverted range", record.id),
                });
            }
            if let Some(embedding) = &record.embedding {
                for actual in [record.embedding_dim, embedding.len()] {
                    if actual != embedding_dim {
                        return Err(StoreError::DimensionMismatch {
                            context: format!("chunk {} of {}", record.id, path.display()),
                            expected: embedding_dim,
                            actual,
                        });
                    }
                }
            }
            chunks.push(Chunk {
                id: record.id,
                text: record.text,
                start_offset: record.start_offset,
                end_offset: record.end_offset,
                embedding: record.embedding,
            });
        }

        Ok(Document {
            id: self.id,
            source_text: self.source_text,
            created_at: self.created_at,
            indexed_at: self.indexed_at,
            status: self.status,
            failure_reason: self.failure_reason,
            chunks,
        })
    }
}

/// One indexed document's vectors, in chunk order.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub id: DocumentId,
    /// `(chunk_id, embedding, chunk_text)`
    pub entries: Vec<(ChunkId, Vec<f32>, String)>,
}

/// Counts taken under a single read lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub indexed: usize,
    pub pending: usize,
    pub failed: usize,
    /// Chunks of indexed documents.
    pub chunks: usize,
    pub last_ingest_at: Option<u64>,
}

/// Document store keyed by document id.
pub struct DocumentStore {
    docs_dir: PathBuf,
    metadata: StoreMetadata,
    documents: RwLock<BTreeMap<DocumentId, Document>>,
    /// Serializes file writes per document.
    file_locks: DashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("docs_dir", &self.docs_dir)
            .field("metadata", &self.metadata)
            .field("documents", &self.documents.read().len())
            .finish()
    }
}

impl DocumentStore {
    /// Open or create the store under `data_dir`.
    ///
    /// Fails closed on unknown format versions and on an embedding space
    /// that differs from the one the store was created with. Documents left
    /// `pending` by a previous process are marked `failed`.
    pub async fn open(
        data_dir: impl AsRef<Path>,
        embedding_dim: usize,
        metric: SimilarityMetric,
        model: &str,
    ) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref();
        let docs_dir = data_dir.join(DOCUMENTS_DIR);
        fs::create_dir_all(&docs_dir).await?;

        let metadata = load_or_create_metadata(data_dir, embedding_dim, metric, model).await?;

        let store = Self {
            docs_dir,
            metadata,
            documents: RwLock::new(BTreeMap::new()),
            file_locks: DashMap::new(),
        };

        let interrupted = store.load_records().await?;
        for id in &interrupted {
            tracing::warn!(target: "documents", "Document {id} was left pending; marking failed");
            store.stage_failed(id, INTERRUPTED_REASON)?;
            store.persist(id).await?;
        }

        tracing::info!(
            target: "documents",
            "Opened document store at {} ({} documents)",
            store.docs_dir.display(),
            store.len()
        );
        Ok(store)
    }

    /// Read every record into memory. Returns ids found pending.
    async fn load_records(&self) -> StoreResult<Vec<DocumentId>> {
        let mut loaded = BTreeMap::new();
        let mut pending = Vec::new();
        let mut entries = fs::read_dir(&self.docs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Leftover temp files from an interrupted write
            if name.starts_with('.') {
                tracing::debug!(target: "documents", "Removing stale temp file {}", path.display());
                fs::remove_file(&path).await?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            let bytes = fs::read(&path).await?;
            let doc = decode_record(&path, &bytes, self.metadata.embedding_dim)?;
            if doc.status == DocumentStatus::Pending {
                pending.push(doc.id.clone());
            }
            loaded.insert(doc.id.clone(), doc);
        }

        *self.documents.write() = loaded;
        Ok(pending)
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    fn record_path(&self, id: &DocumentId) -> PathBuf {
        self.docs_dir.join(format!("{id}.{RECORD_EXT}"))
    }

    fn file_lock(&self, id: &DocumentId) -> Arc<tokio::sync::Mutex<()>> {
        self.file_locks.entry(id.clone()).or_default().clone()
    }

    /// Write the current in-memory state of `id` to disk, or remove its
    /// record if the document no longer exists.
    pub async fn persist(&self, id: &DocumentId) -> StoreResult<()> {
        let lock = self.file_lock(id);
        let _guard = lock.lock().await;

        // Snapshot after taking the file lock so the last writer wins with the newest state
        let record = self
            .documents
            .read()
            .get(id)
            .map(|doc| DocumentRecord::from_document(doc, self.metadata.embedding_dim));
        let path = self.record_path(id);

        match record {
            Some(record) => {
                let json = serde_json::to_vec_pretty(&record).map_err(|e| {
                    StoreError::Serialization {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let tmp = self.docs_dir.join(format!(".{id}.{RECORD_EXT}.tmp"));
                fs::write(&tmp, json).await?;
                fs::rename(&tmp, &path).await?;
                tracing::debug!(target: "documents", "Persisted {id} ({})", record.status);
            }
            None => match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(target: "documents", "Removed record {id}"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }

    // ---- staged (in-memory) mutations ----

    /// Create or replace `id` as a fresh pending document.
    ///
    /// Returns the document that was replaced, if any, so a failed write
    /// can put it back with [`stage_restore`](Self::stage_restore).
    pub fn stage_put(
        &self,
        id: &DocumentId,
        text: String,
        overwrite: bool,
    ) -> StoreResult<Option<Document>> {
        let mut documents = self.documents.write();
        if !overwrite && documents.contains_key(id) {
            return Err(StoreError::DuplicateDocument(id.clone()));
        }
        Ok(documents.insert(
            id.clone(),
            Document::pending(id.clone(), text, get_utc_timestamp()),
        ))
    }

    /// Attach chunks (with embeddings) to a pending document.
    pub fn stage_chunks(&self, id: &DocumentId, chunks: Vec<Chunk>) -> StoreResult<()> {
        for chunk in &chunks {
            if chunk.document_id() != id {
                return Err(StoreError::Corrupt {
                    path: self.record_path(id),
                    reason: format!("chunk {} does not belong to {id}", chunk.id),
                });
            }
            if let Some(embedding) = &chunk.embedding
                && embedding.len() != self.metadata.embedding_dim
            {
                return Err(StoreError::DimensionMismatch {
                    context: format!("chunk {}", chunk.id),
                    expected: self.metadata.embedding_dim,
                    actual: embedding.len(),
                });
            }
        }

        self.with_pending(id, |doc| doc.chunks = chunks)
    }

    /// Commit a pending document as indexed.
    pub fn stage_indexed(&self, id: &DocumentId) -> StoreResult<()> {
        self.with_pending(id, |doc| {
            doc.status = DocumentStatus::Indexed;
            doc.indexed_at = Some(get_utc_timestamp());
            doc.failure_reason = None;
        })
    }

    /// Mark a document failed and drop its embeddings. Text and chunk
    /// boundaries are kept for diagnosis.
    pub fn stage_failed(&self, id: &DocumentId, reason: &str) -> StoreResult<()> {
        let mut documents = self.documents.write();
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreError::DocumentNotFound(id.clone()))?;
        doc.status = DocumentStatus::Failed;
        doc.failure_reason = Some(reason.to_string());
        for chunk in &mut doc.chunks {
            chunk.embedding = None;
        }
        Ok(())
    }

    /// Restart ingestion of a failed document with its stored text.
    pub fn stage_retry(&self, id: &DocumentId) -> StoreResult<String> {
        let mut documents = self.documents.write();
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreError::DocumentNotFound(id.clone()))?;
        if doc.status != DocumentStatus::Failed {
            return Err(StoreError::InvalidState {
                id: id.clone(),
                status: doc.status,
                reason: "only failed documents can be retried",
            });
        }

        let text = doc.source_text.clone();
        *doc = Document::pending(id.clone(), text.clone(), get_utc_timestamp());
        Ok(text)
    }

    /// Remove a document and its chunks from memory.
    pub fn stage_remove(&self, id: &DocumentId) -> StoreResult<Document> {
        self.documents
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::DocumentNotFound(id.clone()))
    }

    /// Put a previously taken document back as it was, replacing any
    /// staged state of the same id.
    pub fn stage_restore(&self, doc: Document) {
        self.documents.write().insert(doc.id.clone(), doc);
    }

    fn with_pending(&self, id: &DocumentId, f: impl FnOnce(&mut Document)) -> StoreResult<()> {
        let mut documents = self.documents.write();
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreError::DocumentNotFound(id.clone()))?;
        if doc.status != DocumentStatus::Pending {
            return Err(StoreError::InvalidState {
                id: id.clone(),
                status: doc.status,
                reason: "expected a pending document",
            });
        }
        f(doc);
        Ok(())
    }

    // ---- durable operations ----

    /// Store `text` under `id` as a pending document.
    ///
    /// Returns `true` when an existing document was replaced. If the write
    /// fails, memory is rolled back to match the record still on disk.
    pub async fn put_document(
        &self,
        id: &DocumentId,
        text: impl Into<String>,
        overwrite: bool,
    ) -> StoreResult<bool> {
        let previous = self.stage_put(id, text.into(), overwrite)?;
        let replaced = previous.is_some();
        if let Err(e) = self.persist(id).await {
            match previous {
                Some(doc) => self.stage_restore(doc),
                None => {
                    let _ = self.stage_remove(id);
                }
            }
            return Err(e);
        }
        Ok(replaced)
    }

    /// Delete a document and its chunks. The document stays if its record
    /// cannot be removed.
    pub async fn delete_document(&self, id: &DocumentId) -> StoreResult<Document> {
        let removed = self.stage_remove(id)?;
        if let Err(e) = self.persist(id).await {
            self.stage_restore(removed);
            return Err(e);
        }
        Ok(removed)
    }

    /// Delete every document. Returns how many were removed.
    ///
    /// Stops at the first record that cannot be removed; that document and
    /// every one not yet reached stay in the store.
    pub async fn clear(&self) -> StoreResult<usize> {
        let taken: Vec<Document> = std::mem::take(&mut *self.documents.write())
            .into_values()
            .collect();
        let total = taken.len();

        let mut remaining = taken.into_iter();
        let mut removed = 0;
        while let Some(doc) = remaining.next() {
            if let Err(e) = self.persist(&doc.id).await {
                tracing::warn!(
                    target: "documents",
                    "Clear stopped after {removed} of {total} documents: {e}"
                );
                self.stage_restore(doc);
                for doc in remaining.by_ref() {
                    self.stage_restore(doc);
                }
                return Err(e);
            }
            removed += 1;
        }
        tracing::info!(target: "documents", "Cleared {total} documents");
        Ok(total)
    }

    // ---- reads ----

    pub fn get_document(&self, id: &DocumentId) -> Option<Document> {
        self.documents.read().get(id).cloned()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.read().contains_key(id)
    }

    pub fn status_of(&self, id: &DocumentId) -> Option<DocumentStatus> {
        self.documents.read().get(id).map(|doc| doc.status)
    }

    /// Summaries ordered by document id.
    pub fn list_documents(&self) -> Vec<DocumentSummary> {
        self.documents.read().values().map(Document::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Vectors of every indexed document; the feed for an index rebuild.
    pub fn indexed_embeddings(&self) -> Vec<IndexedDocument> {
        self.documents
            .read()
            .values()
            .filter(|doc| doc.status == DocumentStatus::Indexed)
            .map(|doc| IndexedDocument {
                id: doc.id.clone(),
                entries: doc
                    .chunks
                    .iter()
                    .filter_map(|chunk| {
                        chunk
                            .embedding
                            .as_ref()
                            .map(|e| (chunk.id.clone(), e.clone(), chunk.text.clone()))
                    })
                    .collect(),
            })
            .collect()
    }

    /// Status counts from one consistent view.
    pub fn snapshot_counts(&self) -> StoreCounts {
        let documents = self.documents.read();
        let mut counts = StoreCounts::default();

        for doc in documents.values() {
            match doc.status {
                DocumentStatus::Pending => counts.pending += 1,
                DocumentStatus::Failed => counts.failed += 1,
                DocumentStatus::Indexed => {
                    counts.indexed += 1;
                    counts.chunks += doc.chunks.len();
                    counts.last_ingest_at = counts.last_ingest_at.max(doc.indexed_at);
                }
            }
        }
        counts
    }
}

/// Check the version, then parse the full record.
fn decode_record(path: &Path, bytes: &[u8], embedding_dim: usize) -> StoreResult<Document> {
    let probe: VersionProbe =
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if probe.format_version != FORMAT_VERSION {
        return Err(StoreError::UnsupportedFormat {
            path: path.to_path_buf(),
            found: probe.format_version,
            supported: FORMAT_VERSION,
        });
    }

    let record: DocumentRecord =
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let expected_name = format!("{}.{RECORD_EXT}", record.id);
    if path.file_name().and_then(|n| n.to_str()) != Some(expected_name.as_str()) {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("record id {} does not match its file name", record.id),
        });
    }

    record.into_document(path, embedding_dim)
}

async fn load_or_create_metadata(
    data_dir: &Path,
    embedding_dim: usize,
    metric: SimilarityMetric,
    model: &str,
) -> StoreResult<StoreMetadata> {
    let path = data_dir.join(META_FILE);

    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let metadata = StoreMetadata::new(embedding_dim, metric, model);
            let json = serde_json::to_vec_pretty(&metadata).map_err(|e| {
                StoreError::Serialization {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;
            fs::write(&path, json).await?;
            tracing::info!(
                target: "documents",
                "Created store metadata (dim={embedding_dim}, metric={metric})"
            );
            return Ok(metadata);
        }
        Err(e) => return Err(e.into()),
    };

    let serialization = |e: serde_json::Error| StoreError::Serialization {
        path: path.clone(),
        reason: e.to_string(),
    };
    let probe: VersionProbe = serde_json::from_slice(&bytes).map_err(serialization)?;
    if probe.format_version != FORMAT_VERSION {
        return Err(StoreError::UnsupportedFormat {
            path: path.clone(),
            found: probe.format_version,
            supported: FORMAT_VERSION,
        });
    }

    let metadata: StoreMetadata = serde_json::from_slice(&bytes).map_err(serialization)?;
    if metadata.embedding_dim != embedding_dim {
        return Err(StoreError::DimensionMismatch {
            context: path.display().to_string(),
            expected: metadata.embedding_dim,
            actual: embedding_dim,
        });
    }
    if metadata.similarity_metric != metric {
        return Err(StoreError::MetricMismatch {
            stored: metadata.similarity_metric,
            configured: metric,
        });
    }
    if metadata.embedding_model != model {
        tracing::warn!(
            target: "documents",
            "Store was built with embedding model '{}', now configured '{model}'",
            metadata.embedding_model
        );
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    async fn open(dir: &TempDir) -> DocumentStore {
        DocumentStore::open(dir.path(), DIM, SimilarityMetric::Cosine, "test-model")
            .await
            .unwrap()
    }

    fn doc_id(name: &str) -> DocumentId {
        DocumentId::new(name).unwrap()
    }

    fn chunk(id: &DocumentId, start: usize, text: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            id: ChunkId::new(id.clone(), start),
            text: text.to_string(),
            start_offset: start,
            end_offset: start + text.chars().count(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let id = doc_id("notes");
        let text = "Line one\r\n\tünïcödé ✓\n\nend  ";

        assert!(!store.put_document(&id, text, false).await.unwrap());

        let doc = store.get_document(&id).unwrap();
        assert_eq!(doc.source_text, text);
        assert_eq!(doc.status, DocumentStatus::Pending);

        // And after a reopen
        drop(store);
        let reopened = open(&dir).await;
        assert_eq!(reopened.get_document(&id).unwrap().source_text, text);
    }

    #[tokio::test]
    async fn test_duplicate_requires_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let id = doc_id("dup");

        store.put_document(&id, "first", false).await.unwrap();
        let err = store.put_document(&id, "second", false).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateDocument(_)));
        assert_eq!(store.get_document(&id).unwrap().source_text, "first");

        assert!(store.put_document(&id, "second", true).await.unwrap());
        assert_eq!(store.get_document(&id).unwrap().source_text, "second");
    }

    #[tokio::test]
    async fn test_indexed_document_survives_restart() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let id = doc_id("sky");

        store.put_document(&id, "The sky is blue.", false).await.unwrap();
        store
            .stage_chunks(
                &id,
                vec![chunk(&id, 0, "The sky is blue.", Some(vec![1.0, 0.0, 0.0, 0.0]))],
            )
            .unwrap();
        store.stage_indexed(&id).unwrap();
        store.persist(&id).await.unwrap();
        drop(store);

        let store = open(&dir).await;
        let doc = store.get_document(&id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Indexed);
        assert!(doc.indexed_at.is_some());
        assert_eq!(doc.chunks.len(), 1);
        assert_eq!(doc.chunks[0].embedding.as_deref(), Some(&[1.0, 0.0, 0.0, 0.0][..]));

        let feed = store.indexed_embeddings();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].entries.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_marked_failed_on_open() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let id = doc_id("crashed");
        store.put_document(&id, "half done", false).await.unwrap();
        drop(store);

        let store = open(&dir).await;
        let doc = store.get_document(&id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.failure_reason.as_deref(), Some(INTERRUPTED_REASON));
        assert_eq!(doc.source_text, "half done");
    }

    #[tokio::test]
    async fn test_unknown_format_version_fails_closed() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        drop(store);

        let record = serde_json::json!({
            "format_version": 99,
            "id": "future",
            "something_new": true,
        });
        std::fs::write(
            dir.path().join("documents").join("future.json"),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

        let err = DocumentStore::open(dir.path(), DIM, SimilarityMetric::Cosine, "test-model")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedFormat { found: 99, .. }));
    }

    #[tokio::test]
    async fn test_dimension_change_rejected() {
        let dir = TempDir::new().unwrap();
        drop(open(&dir).await);

        let err = DocumentStore::open(dir.path(), DIM + 1, SimilarityMetric::Cosine, "test-model")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));

        let err = DocumentStore::open(dir.path(), DIM, SimilarityMetric::Dot, "test-model")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MetricMismatch { .. }));
    }

    #[tokio::test]
    async fn test_failed_drops_embeddings_keeps_text() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let id = doc_id("broken");

        store.put_document(&id, "text", false).await.unwrap();
        store
            .stage_chunks(&id, vec![chunk(&id, 0, "text", Some(vec![0.0; DIM]))])
            .unwrap();
        store.stage_failed(&id, "provider down").unwrap();

        let doc = store.get_document(&id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.chunks.iter().all(|c| c.embedding.is_none()));
        assert_eq!(doc.source_text, "text");
        assert!(store.indexed_embeddings().is_empty());
    }

    #[tokio::test]
    async fn test_stage_chunks_checks_dimension() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let id = doc_id("wrong-dim");

        store.put_document(&id, "text", false).await.unwrap();
        let err = store
            .stage_chunks(&id, vec![chunk(&id, 0, "text", Some(vec![0.0; DIM + 2]))])
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_retry_only_from_failed() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let id = doc_id("again");

        store.put_document(&id, "retry me", false).await.unwrap();
        assert!(matches!(
            store.stage_retry(&id),
            Err(StoreError::InvalidState { .. })
        ));

        store.stage_failed(&id, "boom").unwrap();
        assert_eq!(store.stage_retry(&id).unwrap(), "retry me");
        assert_eq!(store.status_of(&id), Some(DocumentStatus::Pending));
    }

    #[tokio::test]
    async fn test_delete_and_clear_remove_records() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let a = doc_id("a");
        let b = doc_id("b");
        let c = doc_id("c");

        for id in [&a, &b, &c] {
            store.put_document(id, id.as_str(), false).await.unwrap();
        }

        store.delete_document(&a).await.unwrap();
        assert!(!dir.path().join("documents").join("a.json").exists());
        assert!(matches!(
            store.delete_document(&a).await,
            Err(StoreError::DocumentNotFound(_))
        ));

        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.is_empty());
        drop(store);
        assert!(open(&dir).await.is_empty());
    }

    /// Swap the records directory for a plain file so every write fails.
    fn break_records_dir(dir: &TempDir) -> (PathBuf, PathBuf) {
        let docs = dir.path().join(DOCUMENTS_DIR);
        let parked = dir.path().join("documents.parked");
        std::fs::rename(&docs, &parked).unwrap();
        std::fs::write(&docs, b"").unwrap();
        (docs, parked)
    }

    #[tokio::test]
    async fn test_failed_writes_keep_memory_in_line_with_disk() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let kept = doc_id("kept");
        let other = doc_id("other");
        store.put_document(&kept, "first text", false).await.unwrap();
        store.put_document(&other, "other text", false).await.unwrap();

        let (docs, parked) = break_records_dir(&dir);

        assert!(store.put_document(&kept, "second text", true).await.is_err());
        assert_eq!(store.get_document(&kept).unwrap().source_text, "first text");

        let fresh = doc_id("fresh");
        assert!(store.put_document(&fresh, "never written", false).await.is_err());
        assert!(!store.contains(&fresh));

        assert!(store.delete_document(&kept).await.is_err());
        assert!(store.contains(&kept));

        assert!(store.clear().await.is_err());
        assert_eq!(store.len(), 2);

        std::fs::remove_file(&docs).unwrap();
        std::fs::rename(&parked, &docs).unwrap();
        drop(store);

        let store = open(&dir).await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_document(&kept).unwrap().source_text, "first text");
    }

    #[tokio::test]
    async fn test_snapshot_counts() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let ok = doc_id("ok");
        let bad = doc_id("bad");
        let wip = doc_id("wip");

        store.put_document(&ok, "ok text", false).await.unwrap();
        store
            .stage_chunks(
                &ok,
                vec![
                    chunk(&ok, 0, "ok", Some(vec![0.5; DIM])),
                    chunk(&ok, 2, " text", Some(vec![0.5; DIM])),
                ],
            )
            .unwrap();
        store.stage_indexed(&ok).unwrap();

        store.put_document(&bad, "bad", false).await.unwrap();
        store.stage_failed(&bad, "nope").unwrap();

        store.put_document(&wip, "wip", false).await.unwrap();
        store
            .stage_chunks(&wip, vec![chunk(&wip, 0, "wip", Some(vec![0.5; DIM]))])
            .unwrap();

        let counts = store.snapshot_counts();
        assert_eq!(counts.indexed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 1);
        // Pending chunks are not counted
        assert_eq!(counts.chunks, 2);
        assert!(counts.last_ingest_at.is_some());
    }
}
