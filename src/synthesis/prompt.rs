//! Grounded prompt template.
//!
//! `build_prompt` is a pure function of the query and the context chunks.
//! Layout:
//!
//! ```text
//! <instructions>
//!
//! <context>
//! [1] first chunk text
//!
//! [2] second chunk text
//! </context>
//!
//! Question: <query>
//! Answer:
//! ```
//!
//! Chunks appear verbatim in relevance order and are numbered from 1 so the
//! model can cite them as `[n]`. With no chunks the context block holds
//! [`NO_CONTEXT`] and the instructions ask the model to say it does not know.

use regex::Regex;
use std::sync::LazyLock;

use crate::vector::ScoredChunk;

pub const CONTEXT_OPEN: &str = "<context>";
pub const CONTEXT_CLOSE: &str = "</context>";
pub const NO_CONTEXT: &str = "No context is available for this question.";

const QUESTION_MARKER: &str = "\n\nQuestion: ";

const GROUNDED_INSTRUCTIONS: &str = "\
You answer questions using only the numbered context fragments below.
Do not use outside knowledge. If the fragments do not contain the answer, \
say that the knowledge base does not cover it and state what is missing.
Cite every fragment you rely on by its number in square brackets, e.g. [1].";

const EMPTY_INSTRUCTIONS: &str = "\
You answer questions from a knowledge base. No relevant fragments were \
found for this question.
Tell the user that the knowledge base does not contain information on it. \
Do not guess or use outside knowledge.";

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("valid citation regex"));

/// Build the prompt for `query` over `chunks` (most relevant first).
pub fn build_prompt(query: &str, chunks: &[ScoredChunk]) -> String {
    let (instructions, context) = if chunks.is_empty() {
        (EMPTY_INSTRUCTIONS, NO_CONTEXT.to_string())
    } else {
        let blocks: Vec<String> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk.text.trim()))
            .collect();
        (GROUNDED_INSTRUCTIONS, blocks.join("\n\n"))
    };

    format!(
        "{instructions}\n\n{CONTEXT_OPEN}\n{context}\n{CONTEXT_CLOSE}{QUESTION_MARKER}{}\nAnswer:",
        query.trim()
    )
}

/// The context section of a prompt built by [`build_prompt`], or `None`
/// when it carries no fragments.
pub fn extract_context(prompt: &str) -> Option<&str> {
    let start = prompt.find(CONTEXT_OPEN)? + CONTEXT_OPEN.len();
    let close = format!("{CONTEXT_CLOSE}{QUESTION_MARKER}");
    let end = prompt.rfind(&close)?;
    if end < start {
        return None;
    }

    let context = prompt[start..end].trim();
    (!context.is_empty() && context != NO_CONTEXT).then_some(context)
}

/// Fragment numbers cited in `answer` as `[n]` or `[n, m]`, in order of
/// first appearance, limited to `1..=available`.
pub fn cited_indices(answer: &str, available: usize) -> Vec<usize> {
    let mut cited = Vec::new();
    for caps in CITATION.captures_iter(answer) {
        for number in caps[1].split(',') {
            if let Ok(n) = number.trim().parse::<usize>()
                && (1..=available).contains(&n)
                && !cited.contains(&n)
            {
                cited.push(n);
            }
        }
    }
    cited
}
