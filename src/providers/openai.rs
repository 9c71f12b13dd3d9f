//! OpenAI-compatible HTTP providers.
//!
//! Works against any server exposing `/embeddings` and `/chat/completions`
//! in the OpenAI wire format (OpenAI, Ollama, vLLM, llama.cpp server, ...).
//! Timeouts are enforced by the caller's retry policy, not by the client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingProvider, GenerationProvider, ProviderError};
use crate::config::{EmbeddingConfig, GenerationConfig};

const SYSTEM_PROMPT: &str =
    "You are a careful assistant that answers strictly from the supplied context.";

#[derive(Debug, Clone)]
struct HttpTarget {
    base_url: String,
    api_key: String,
    client: Client,
}

impl HttpTarget {
    fn new(endpoint: &str, api_key: Option<&str>, what: &str) -> Result<Self, ProviderError> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured(format!("{what}.api_key is not set")))?;

        Ok(Self {
            base_url: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: Client::new(),
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Unavailable(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    if status == StatusCode::REQUEST_TIMEOUT {
        ProviderError::Timeout
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Unavailable(detail)
    } else {
        ProviderError::Rejected(detail)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `/embeddings` client.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    target: HttpTarget,
    model: String,
    dimension: usize,
    max_input_chars: usize,
}

impl OpenAiEmbeddings {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            target: HttpTarget::new(&config.endpoint, config.api_key.as_deref(), "embedding")?,
            model: config.model.clone(),
            dimension: config.dimension,
            max_input_chars: config.max_input_chars,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut parsed: EmbeddingResponse = self
            .target
            .post(
                "/embeddings",
                json!({
                    "model": self.model,
                    "input": texts,
                }),
            )
            .await?;

        // Items may come back out of order
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

/// `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    target: HttpTarget,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    pub fn from_config(config: &GenerationConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            target: HttpTarget::new(&config.endpoint, config.api_key.as_deref(), "generation")?,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiChat {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let parsed: ChatResponse = self
            .target
            .post(
                "/chat/completions",
                json!({
                    "model": self.model,
                    "messages": [
                        { "role": "system", "content": SYSTEM_PROMPT },
                        { "role": "user", "content": prompt },
                    ],
                    "temperature": self.temperature,
                    "max_tokens": self.max_tokens,
                }),
            )
            .await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("response has no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_not_configured() {
        let config = EmbeddingConfig::default();
        assert!(matches!(
            OpenAiEmbeddings::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let config = GenerationConfig {
            api_key: Some("   ".to_string()),
            ..GenerationConfig::default()
        };
        assert!(matches!(
            OpenAiChat::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT, ""),
            ProviderError::Timeout
        );
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            ProviderError::Rejected(_)
        ));
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let config = EmbeddingConfig {
            endpoint: "http://localhost:11434/v1/".to_string(),
            api_key: Some("key".to_string()),
            ..EmbeddingConfig::default()
        };
        let provider = OpenAiEmbeddings::from_config(&config).unwrap();
        assert_eq!(provider.target.base_url, "http://localhost:11434/v1");
        assert_eq!(provider.dimension(), 384);
    }
}
