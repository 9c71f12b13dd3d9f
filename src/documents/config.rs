//! Configuration types for document chunking.

use serde::{Deserialize, Serialize};

/// Configuration for document chunking.
///
/// Sizes are counted in characters (Unicode scalar values), the same unit
/// the embedding provider's input limit is expressed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters. Larger spans are cut.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Characters shared by adjacent chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_max_chunk_size() -> usize {
    500
}

fn default_overlap() -> usize {
    50
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chunk_size: usize, overlap: usize) -> Self {
        Self {
            max_chunk_size,
            overlap,
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("max_chunk_size must be greater than zero".to_string());
        }

        if self.overlap >= self.max_chunk_size {
            return Err(format!(
                "overlap ({}) must be less than max_chunk_size ({})",
                self.overlap, self.max_chunk_size
            ));
        }

        Ok(())
    }
}
