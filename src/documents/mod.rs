//! Documents: chunking, cleanup and durable storage.
//!
//! - [`chunker`] splits text into overlapping, boundary-aware chunks
//! - [`clean`] strips conversion debris from markdown before ingestion
//! - [`store`] persists documents, chunks and embeddings as versioned records

pub mod chunker;
pub mod clean;
pub mod config;
pub mod metadata;
pub mod store;
pub mod types;

pub use chunker::{BoundaryChunker, ChunkError, Chunker, RawChunk};
pub use clean::clean_markdown;
pub use config::ChunkingConfig;
pub use metadata::{FORMAT_VERSION, StoreMetadata};
pub use store::{DocumentStore, IndexedDocument, StoreCounts, StoreError, StoreResult};
pub use types::{
    Chunk, ChunkId, Document, DocumentId, DocumentStatus, DocumentSummary, InvalidId,
};
