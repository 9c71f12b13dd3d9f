//! Error taxonomy of the knowledge service.
//!
//! Component errors (`ChunkError`, `StoreError`, `IndexError`,
//! `ProviderError`) convert into [`KnowledgeError`], which is what the public
//! API returns. Each variant belongs to one class:
//!
//! | Class | Variants | Retry? |
//! |---|---|---|
//! | caller input | `InvalidInput`, `InputTooLarge`, `DocumentNotFound` | no |
//! | conflict | `DuplicateDocument` | no, choose overwrite or a new id |
//! | transient | `EmbeddingUnavailable`, `GenerationUnavailable`, `ProviderTimeout` | yes |
//! | data integrity | `DimensionMismatch`, `UnsupportedFormat`, `Integrity` | never |
//! | storage | `Storage` | operator |

use thiserror::Error;

use crate::documents::{ChunkError, DocumentId, InvalidId, StoreError};
use crate::vector::IndexError;

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Document already exists: {0} (pass overwrite to replace it)")]
    DuplicateDocument(DocumentId),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Input of {len} characters exceeds the provider limit of {limit}")]
    InputTooLarge { len: usize, limit: usize },

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Generation provider unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Data integrity error: {0}")]
    Integrity(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl KnowledgeError {
    /// Transient provider trouble; the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KnowledgeError::EmbeddingUnavailable(_)
                | KnowledgeError::GenerationUnavailable(_)
                | KnowledgeError::ProviderTimeout { .. }
        )
    }

    /// Configuration or migration problem; never retried.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            KnowledgeError::DimensionMismatch { .. }
                | KnowledgeError::UnsupportedFormat(_)
                | KnowledgeError::Integrity(_)
        )
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            KnowledgeError::InvalidInput(_) => "invalid_input",
            KnowledgeError::DuplicateDocument(_) => "duplicate_document",
            KnowledgeError::DocumentNotFound(_) => "document_not_found",
            KnowledgeError::InputTooLarge { .. } => "input_too_large",
            KnowledgeError::EmbeddingUnavailable(_) => "embedding_unavailable",
            KnowledgeError::GenerationUnavailable(_) => "generation_unavailable",
            KnowledgeError::ProviderTimeout { .. } => "provider_timeout",
            KnowledgeError::DimensionMismatch { .. } => "dimension_mismatch",
            KnowledgeError::UnsupportedFormat(_) => "unsupported_format",
            KnowledgeError::Integrity(_) => "integrity",
            KnowledgeError::Storage(_) => "storage",
        }
    }
}

impl From<ChunkError> for KnowledgeError {
    fn from(e: ChunkError) -> Self {
        KnowledgeError::InvalidInput(e.to_string())
    }
}

impl From<InvalidId> for KnowledgeError {
    fn from(e: InvalidId) -> Self {
        KnowledgeError::InvalidInput(e.to_string())
    }
}

impl From<IndexError> for KnowledgeError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::DimensionMismatch { expected, actual } => {
                KnowledgeError::DimensionMismatch { expected, actual }
            }
            other => KnowledgeError::Integrity(other.to_string()),
        }
    }
}

impl From<StoreError> for KnowledgeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateDocument(id) => KnowledgeError::DuplicateDocument(id),
            StoreError::DocumentNotFound(id) => KnowledgeError::DocumentNotFound(id),
            StoreError::DimensionMismatch {
                expected, actual, ..
            } => KnowledgeError::DimensionMismatch { expected, actual },
            e @ StoreError::UnsupportedFormat { .. } => {
                KnowledgeError::UnsupportedFormat(e.to_string())
            }
            e @ (StoreError::MetricMismatch { .. } | StoreError::Corrupt { .. }) => {
                KnowledgeError::Integrity(e.to_string())
            }
            e @ StoreError::InvalidState { .. } => KnowledgeError::InvalidInput(e.to_string()),
            e @ (StoreError::Io(_) | StoreError::Serialization { .. }) => {
                KnowledgeError::Storage(e.to_string())
            }
        }
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
