//! Core types for documents, chunks and their identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::content_hash;

/// Hex characters of the content hash used for anonymous documents.
const HASH_ID_LEN: usize = 16;

/// Rejected document or chunk identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier '{value}': {reason}")]
pub struct InvalidId {
    pub value: String,
    pub reason: &'static str,
}

impl InvalidId {
    fn new(value: impl Into<String>, reason: &'static str) -> Self {
        Self {
            value: value.into(),
            reason,
        }
    }
}

/// Stable identifier for a document.
///
/// Either a user-supplied name or a prefix of the SHA-256 of the text.
/// Restricted to `[A-Za-z0-9._-]` so it can double as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub const MAX_LEN: usize = 128;

    /// Validate a user-supplied name.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidId> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidId::new(name, "must not be empty"));
        }
        if name.len() > Self::MAX_LEN {
            return Err(InvalidId::new(name, "longer than 128 characters"));
        }
        if name.starts_with('.') {
            return Err(InvalidId::new(name, "must not start with '.'"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(InvalidId::new(name, "allowed characters are A-Z a-z 0-9 . _ -"));
        }
        Ok(Self(name))
    }

    /// Derive an id from the document text.
    pub fn from_content(text: &str) -> Self {
        let mut hash = content_hash(text);
        hash.truncate(HASH_ID_LEN);
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

impl FromStr for DocumentId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier for a chunk: owning document plus the chunk's start offset.
///
/// Rendered as `<document>#<offset>`. Chunk starts are strictly increasing
/// within a document, so the pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId {
    document: DocumentId,
    offset: usize,
}

impl ChunkId {
    pub fn new(document: DocumentId, offset: usize) -> Self {
        Self { document, offset }
    }

    /// Back-reference to the owning document.
    pub fn document_id(&self) -> &DocumentId {
        &self.document
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document, self.offset)
    }
}

impl FromStr for ChunkId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (document, offset) = s
            .rsplit_once('#')
            .ok_or_else(|| InvalidId::new(s, "expected <document>#<offset>"))?;
        let offset = offset
            .parse()
            .map_err(|_| InvalidId::new(s, "offset is not a number"))?;
        Ok(Self::new(DocumentId::new(document)?, offset))
    }
}

impl TryFrom<String> for ChunkId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.to_string()
    }
}

/// Ingestion state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Ingestion in progress.
    Pending,
    /// Chunked, embedded and searchable.
    Indexed,
    /// Some step failed; the text is kept for retry.
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DocumentStatus::Pending)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A bounded segment of a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,

    /// Verbatim slice of the source text.
    pub text: String,

    /// Character offset of the first character (inclusive).
    pub start_offset: usize,

    /// Character offset past the last character (exclusive).
    pub end_offset: usize,

    /// `None` until the embedding is computed.
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn document_id(&self) -> &DocumentId {
        self.id.document_id()
    }
}

/// A document with its chunks and ingestion metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub source_text: String,
    /// UNIX seconds.
    pub created_at: u64,
    /// UNIX seconds of the last successful ingestion.
    pub indexed_at: Option<u64>,
    pub status: DocumentStatus,
    /// Human-readable reason when `status` is `Failed`.
    pub failure_reason: Option<String>,
    pub chunks: Vec<Chunk>,
}

impl Document {
    /// A fresh pending document with no chunks.
    pub fn pending(id: DocumentId, source_text: String, created_at: u64) -> Self {
        Self {
            id,
            source_text,
            created_at,
            indexed_at: None,
            status: DocumentStatus::Pending,
            failure_reason: None,
            chunks: Vec::new(),
        }
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            status: self.status,
            created_at: self.created_at,
            indexed_at: self.indexed_at,
            chunk_count: self.chunks.len(),
            char_count: self.source_text.chars().count(),
            failure_reason: self.failure_reason.clone(),
        }
    }
}

/// Listing view of a document without its text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub status: DocumentStatus,
    pub created_at: u64,
    pub indexed_at: Option<u64>,
    pub chunk_count: usize,
    pub char_count: usize,
    pub failure_reason: Option<String>,
}
