//! Generation without a model.
//!
//! Answers with the retrieved fragments themselves, numbered as in the
//! prompt, so the deployment works (and cites correctly) when no LLM is
//! configured.

use async_trait::async_trait;

use super::{GenerationProvider, ProviderError};
use crate::synthesis::prompt::extract_context;

pub const NOT_FOUND_ANSWER: &str = "I could not find information on this in the knowledge base. \
Try rephrasing the question or add more documents.";

#[derive(Debug, Default, Clone)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GenerationProvider for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        Ok(match extract_context(prompt) {
            Some(context) => format!("Relevant excerpts from the knowledge base:\n\n{context}"),
            None => NOT_FOUND_ANSWER.to_string(),
        })
    }
}
