//! Store-level metadata: format version and the vector space the stored
//! embeddings belong to.

use serde::{Deserialize, Serialize};

use crate::vector::SimilarityMetric;

/// Record and metadata format this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

/// Contents of `store.meta` at the root of the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Version of the on-disk format
    pub format_version: u32,

    /// Dimension every stored embedding has
    pub embedding_dim: usize,

    /// Metric the embeddings were produced for
    pub similarity_metric: SimilarityMetric,

    /// Embedding model name, informational
    pub embedding_model: String,

    /// Creation timestamp (UNIX seconds)
    pub created_at: u64,
}

impl StoreMetadata {
    pub fn new(embedding_dim: usize, similarity_metric: SimilarityMetric, model: &str) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            embedding_dim,
            similarity_metric,
            embedding_model: model.to_string(),
            created_at: crate::utils::get_utc_timestamp(),
        }
    }
}

/// Just enough of any versioned file to check its version before parsing
/// the rest.
#[derive(Debug, Deserialize)]
pub(crate) struct VersionProbe {
    pub format_version: u32,
}
