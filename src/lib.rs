pub mod cli;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod providers;
pub mod retrieve;
pub mod retry;
pub mod service;
pub mod synthesis;
pub mod utils;
pub mod vector;

pub use config::Settings;
pub use documents::{
    BoundaryChunker, Chunk, ChunkId, Chunker, ChunkingConfig, Document, DocumentId,
    DocumentStatus, DocumentStore, DocumentSummary,
};
pub use embedding::EmbeddingGateway;
pub use error::{KnowledgeError, KnowledgeResult};
pub use providers::{EmbeddingProvider, GenerationProvider, ProviderError};
pub use retrieve::Retriever;
pub use retry::RetryPolicy;
pub use service::{AddOutcome, KnowledgeBaseStatus, KnowledgeService};
pub use synthesis::{Answer, AnswerSynthesizer};
pub use vector::{ScoredChunk, SimilarityMetric, VectorIndex};
