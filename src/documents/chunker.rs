//! Document chunking.
//!
//! Provides the `Chunker` trait and a boundary-aware implementation that
//! splits text into overlapping windows suitable for embedding.

use thiserror::Error;

use super::config::ChunkingConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Document text is empty or whitespace-only")]
    EmptyInput,

    #[error("Invalid chunking configuration: {0}")]
    InvalidConfig(String),
}

/// A raw chunk before being assigned IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Character offset of the first character (inclusive).
    pub start_offset: usize,

    /// Character offset past the last character (exclusive).
    pub end_offset: usize,

    /// The text content of this chunk.
    pub content: String,
}

impl RawChunk {
    /// Create a new raw chunk.
    pub fn new(start_offset: usize, end_offset: usize, content: String) -> Self {
        Self {
            start_offset,
            end_offset,
            content,
        }
    }

    /// Get character count.
    pub fn char_count(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Trait for document chunking strategies.
///
/// Implementations must be deterministic: the same text and config always
/// produce the same boundaries.
pub trait Chunker: Send + Sync {
    /// Split document content into ordered chunks.
    fn chunk(&self, content: &str, config: &ChunkingConfig) -> Result<Vec<RawChunk>, ChunkError>;
}

/// Boundary levels tried in order when choosing a cut point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Whitespace,
}

const BOUNDARY_PRIORITY: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Whitespace,
];

impl Boundary {
    /// Whether a cut right before `chars[pos]` ends on this kind of boundary.
    fn matches(self, chars: &[char], pos: usize) -> bool {
        let prev = chars[pos - 1];
        match self {
            Boundary::Paragraph => prev == '\n' && pos >= 2 && chars[pos - 2] == '\n',
            Boundary::Line => prev == '\n',
            Boundary::Sentence => {
                prev.is_whitespace()
                    && pos >= 2
                    && matches!(chars[pos - 2], '.' | '!' | '?' | '…')
            }
            Boundary::Whitespace => prev.is_whitespace(),
        }
    }
}

/// Sliding-window chunker that prefers semantic cut points.
///
/// Algorithm, per window `[start, start + max_chunk_size)`:
/// 1. If the window reaches the end of the text, emit the remainder
/// 2. Otherwise cut at the last paragraph break inside the window, else the
///    last line break, else the last sentence end, else the last whitespace
/// 3. With no boundary at all, hard cut at the window end
/// 4. Start the next window `overlap` characters before the cut
///
/// Cut points are only accepted past `start + overlap`, so every window
/// advances. Offsets are character offsets into the source text.
#[derive(Debug, Default)]
pub struct BoundaryChunker;

impl BoundaryChunker {
    /// Create a new boundary chunker.
    pub fn new() -> Self {
        Self
    }
}

impl Chunker for BoundaryChunker {
    fn chunk(&self, content: &str, config: &ChunkingConfig) -> Result<Vec<RawChunk>, ChunkError> {
        config.validate().map_err(ChunkError::InvalidConfig)?;

        if content.trim().is_empty() {
            return Err(ChunkError::EmptyInput);
        }

        let chars: Vec<char> = content.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let window_end = (start + config.max_chunk_size).min(total);
            let end = if window_end == total {
                total
            } else {
                find_cut(&chars, start + config.overlap, window_end).unwrap_or(window_end)
            };

            let text: String = chars[start..end].iter().collect();
            // Overlap regions can make a window all whitespace
            if !text.trim().is_empty() {
                chunks.push(RawChunk::new(start, end, text));
            }

            if end == total {
                break;
            }
            start = end - config.overlap;
        }

        Ok(chunks)
    }
}

/// Last cut position in `(lo, hi]` at the highest-priority boundary level.
fn find_cut(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    BOUNDARY_PRIORITY.iter().find_map(|boundary| {
        (lo + 1..=hi)
            .rev()
            .find(|&pos| boundary.matches(chars, pos))
    })
}
