//! Grounded answer generation.

pub mod prompt;
mod synthesizer;

pub use prompt::build_prompt;
pub use synthesizer::{Answer, AnswerSynthesizer};
