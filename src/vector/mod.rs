//! Vector index and similarity metrics.

pub mod index;
pub mod similarity;

pub use index::{IndexError, IndexResult, ScoredChunk, VectorEntry, VectorIndex};
pub use similarity::{SimilarityMetric, cosine_similarity, dot_product, normalize};
