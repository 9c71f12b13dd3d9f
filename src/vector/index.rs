//! In-memory exact nearest-neighbour index.
//!
//! The index is a derived structure: it is rebuilt from the document store at
//! startup and never persisted on its own. All entries sit behind one
//! `RwLock`, and every per-document operation (`replace_document`,
//! `delete_by_document`) takes the write lock exactly once, so a concurrent
//! query observes either all of a document's entries or none of them.

use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

use super::similarity::SimilarityMetric;
use crate::documents::{ChunkId, DocumentId, IndexedDocument};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Chunk {chunk} does not belong to document {document}")]
    ForeignChunk { chunk: ChunkId, document: DocumentId },

    #[error("Vector for chunk {0} contains NaN or infinite values")]
    NonFinite(ChunkId),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// One query hit. Carries the chunk text so results need no second lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub text: String,
}

impl ScoredChunk {
    pub fn document_id(&self) -> &DocumentId {
        self.chunk_id.document_id()
    }
}

/// Input for a batch insert.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
    pub text: String,
}

#[derive(Debug)]
struct StoredEntry {
    vector: Vec<f32>,
    text: Arc<str>,
    /// Insertion sequence; newer entries win score ties.
    seq: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<ChunkId, StoredEntry>,
    by_document: HashMap<DocumentId, BTreeSet<ChunkId>>,
    next_seq: u64,
}

impl IndexState {
    fn upsert(&mut self, chunk_id: ChunkId, vector: Vec<f32>, text: Arc<str>) {
        let seq = match self.entries.get(&chunk_id) {
            // Identical vector: keep position so results do not reorder
            Some(existing) if existing.vector == vector => existing.seq,
            _ => {
                self.next_seq += 1;
                self.next_seq
            }
        };

        self.by_document
            .entry(chunk_id.document_id().clone())
            .or_default()
            .insert(chunk_id.clone());
        self.entries.insert(chunk_id, StoredEntry { vector, text, seq });
    }

    fn remove_document(&mut self, document_id: &DocumentId) -> usize {
        let Some(chunk_ids) = self.by_document.remove(document_id) else {
            return 0;
        };
        for chunk_id in &chunk_ids {
            self.entries.remove(chunk_id);
        }
        chunk_ids.len()
    }
}

/// A scored entry borrowed from the index during a query.
struct Candidate<'a> {
    score: f32,
    seq: u64,
    chunk_id: &'a ChunkId,
    text: &'a Arc<str>,
}

impl Candidate<'_> {
    /// Best first: higher score, then later insertion.
    fn rank(a: &Self, b: &Self) -> Ordering {
        b.score.total_cmp(&a.score).then_with(|| b.seq.cmp(&a.seq))
    }
}

/// Brute-force vector index with a fixed dimension and metric.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    metric: SimilarityMetric,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    pub fn new(dimension: usize, metric: SimilarityMetric) -> Self {
        Self {
            dimension,
            metric,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    fn check_vector(&self, chunk_id: &ChunkId, vector: &[f32]) -> IndexResult<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if !vector.iter().all(|x| x.is_finite()) {
            return Err(IndexError::NonFinite(chunk_id.clone()));
        }
        Ok(())
    }

    /// Add or replace the entry for `chunk_id`.
    pub fn insert(
        &self,
        chunk_id: ChunkId,
        vector: Vec<f32>,
        text: impl Into<Arc<str>>,
    ) -> IndexResult<()> {
        self.check_vector(&chunk_id, &vector)?;
        self.state.write().upsert(chunk_id, vector, text.into());
        Ok(())
    }

    /// Atomically swap a document's entries for `entries`.
    ///
    /// Everything is validated before the lock is taken; on error the index
    /// is unchanged.
    pub fn replace_document(
        &self,
        document_id: &DocumentId,
        entries: Vec<VectorEntry>,
    ) -> IndexResult<usize> {
        for entry in &entries {
            if entry.chunk_id.document_id() != document_id {
                return Err(IndexError::ForeignChunk {
                    chunk: entry.chunk_id.clone(),
                    document: document_id.clone(),
                });
            }
            self.check_vector(&entry.chunk_id, &entry.vector)?;
        }

        let count = entries.len();
        let mut state = self.state.write();
        state.remove_document(document_id);
        for entry in entries {
            state.upsert(entry.chunk_id, entry.vector, entry.text.into());
        }
        Ok(count)
    }

    /// Remove every entry of a document. Returns how many were removed.
    pub fn delete_by_document(&self, document_id: &DocumentId) -> usize {
        let removed = self.state.write().remove_document(document_id);
        if removed > 0 {
            tracing::debug!(target: "vector", "Removed {removed} entries of {document_id}");
        }
        removed
    }

    /// The `k` entries most similar to `vector`, best first.
    ///
    /// Ties are broken by most recent insertion. Fewer than `k` entries
    /// returns all of them.
    pub fn query(&self, vector: &[f32], k: usize) -> IndexResult<Vec<ScoredChunk>> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        let mut scored: Vec<Candidate<'_>> = state
            .entries
            .iter()
            .map(|(id, entry)| Candidate {
                score: self.metric.score(vector, &entry.vector),
                seq: entry.seq,
                chunk_id: id,
                text: &entry.text,
            })
            .collect();

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, Candidate::rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(Candidate::rank);

        Ok(scored
            .into_iter()
            .map(|c| ScoredChunk {
                chunk_id: c.chunk_id.clone(),
                score: c.score,
                text: c.text.to_string(),
            })
            .collect())
    }

    /// Replace the whole contents with the given documents' vectors.
    pub fn rebuild(&self, documents: Vec<IndexedDocument>) -> IndexResult<usize> {
        let mut fresh = IndexState::default();
        for document in documents {
            for (chunk_id, vector, text) in document.entries {
                self.check_vector(&chunk_id, &vector)?;
                fresh.upsert(chunk_id, vector, text.into());
            }
        }

        let count = fresh.entries.len();
        *self.state.write() = fresh;
        tracing::info!(target: "vector", "Rebuilt index with {count} vectors");
        Ok(count)
    }

    pub fn clear(&self) {
        *self.state.write() = IndexState::default();
    }

    pub fn contains(&self, chunk_id: &ChunkId) -> bool {
        self.state.read().entries.contains_key(chunk_id)
    }

    /// Entries held for one document.
    pub fn document_len(&self, document_id: &DocumentId) -> usize {
        self.state
            .read()
            .by_document
            .get(document_id)
            .map_or(0, BTreeSet::len)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}
