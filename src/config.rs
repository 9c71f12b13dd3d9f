//! Configuration module for the knowledge service.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `RAGBASE_` and use double underscores
//! to separate nested levels:
//! - `RAGBASE_RETRIEVAL__K=5` sets `retrieval.k`
//! - `RAGBASE_EMBEDDING__PROVIDER=openai` sets `embedding.provider`
//! - `RAGBASE_PROVIDER__TIMEOUT_MS=5000` sets `provider.timeout_ms`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::documents::ChunkingConfig;
use crate::retry::RetryPolicy;
use crate::vector::SimilarityMetric;

/// Directory holding the settings file and, by default, the data directory.
pub const CONFIG_DIR: &str = ".ragbase";

const SETTINGS_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "RAGBASE_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Where document records and store metadata live
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Chunk sizes (in characters)
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding provider and vector space settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval defaults for `ask`
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Generation provider settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Timeout and retry policy shared by provider calls
    #[serde(default)]
    pub provider: ProviderPolicyConfig,

    /// Ingestion options used by the CLI
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Deterministic offline feature hashing
    Hashing,
    /// Any OpenAI-compatible `/embeddings` endpoint
    OpenAi,
    /// Local ONNX model (requires the `local-embeddings` feature)
    FastEmbed,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub provider: EmbeddingBackend,

    /// Model name passed to the provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Base URL for HTTP providers
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API key for HTTP providers. Usually set via `RAGBASE_EMBEDDING__API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Fixed vector dimension for the lifetime of the data directory
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Metric the provider's vectors are meaningful under
    #[serde(default)]
    pub similarity_metric: SimilarityMetric,

    /// Maximum texts per provider call
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Longest single input the provider accepts, in characters
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the synthesizer
    #[serde(default = "default_k")]
    pub k: usize,

    /// Minimum similarity score for a chunk to count as relevant
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Candidates fetched per requested result before filtering
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationBackend {
    /// Answer with the retrieved context itself (no model)
    Extractive,
    /// Any OpenAI-compatible `/chat/completions` endpoint
    OpenAi,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_backend")]
    pub provider: GenerationBackend,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderPolicyConfig {
    /// Per-call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt for embedding calls
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// First backoff delay; doubles on each retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    /// Run markdown cleanup before chunking
    #[serde(default = "default_false")]
    pub clean_markdown: bool,

    /// File extensions picked up when adding a directory
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `service = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("data")
}
fn default_false() -> bool {
    false
}
fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Hashing
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_dimension() -> usize {
    384
}
fn default_max_batch_size() -> usize {
    64
}
fn default_max_input_chars() -> usize {
    8192
}
fn default_k() -> usize {
    3
}
fn default_min_score() -> f32 {
    0.25
}
fn default_overfetch() -> usize {
    1
}
fn default_generation_backend() -> GenerationBackend {
    GenerationBackend::Extractive
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    800
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retry_count() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            provider: ProviderPolicyConfig::default(),
            ingest: IngestConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_backend(),
            model: default_embedding_model(),
            endpoint: default_endpoint(),
            api_key: None,
            dimension: default_dimension(),
            similarity_metric: SimilarityMetric::default(),
            max_batch_size: default_max_batch_size(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            min_score: default_min_score(),
            overfetch: default_overfetch(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_backend(),
            model: default_generation_model(),
            endpoint: default_endpoint(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ProviderPolicyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl ProviderPolicyConfig {
    /// Retry policy for embedding calls: first attempt plus `retry_count` retries.
    pub fn embedding_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_count + 1,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.timeout_ms),
        )
    }

    /// Generation is never retried here; callers decide.
    pub fn generation_policy(&self) -> RetryPolicy {
        RetryPolicy::single_attempt(Duration::from_millis(self.timeout_ms))
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            clean_markdown: default_false(),
            extensions: default_extensions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .ragbase directory
        let Some(config_path) = Self::find_workspace_config() else {
            return Self::load_from(PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));
        };

        let mut settings = Self::load_from(&config_path)?;
        // Relative data directories belong to the workspace, not the cwd
        if settings.data_dir.is_relative()
            && let Some(root) = config_path.parent().and_then(Path::parent)
        {
            settings.data_dir = root.join(&settings.data_dir);
        }
        Ok(settings)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore (__) separates nested levels,
            // single underscore (_) remains as is within field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by looking for a .ragbase directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(SETTINGS_FILE));
            }
        }

        None
    }

    /// Reject combinations the service cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        self.chunking.validate()?;

        let embedding = &self.embedding;
        if embedding.dimension == 0 {
            return Err("embedding.dimension must be greater than zero".to_string());
        }
        if embedding.max_batch_size == 0 {
            return Err("embedding.max_batch_size must be greater than zero".to_string());
        }
        if self.chunking.max_chunk_size > embedding.max_input_chars {
            return Err(format!(
                "chunking.max_chunk_size ({}) exceeds embedding.max_input_chars ({})",
                self.chunking.max_chunk_size, embedding.max_input_chars
            ));
        }

        let retrieval = &self.retrieval;
        if retrieval.k == 0 {
            return Err("retrieval.k must be greater than zero".to_string());
        }
        if retrieval.overfetch == 0 {
            return Err("retrieval.overfetch must be at least 1".to_string());
        }
        if !retrieval.min_score.is_finite() {
            return Err("retrieval.min_score must be a finite number".to_string());
        }
        // Dot products are unbounded for unnormalized vectors
        if embedding.similarity_metric == SimilarityMetric::Cosine
            && !(-1.0..=1.0).contains(&retrieval.min_score)
        {
            return Err(format!(
                "retrieval.min_score ({}) must be within [-1, 1]",
                retrieval.min_score
            ));
        }

        if self.provider.timeout_ms == 0 {
            return Err("provider.timeout_ms must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.chunking.max_chunk_size, 500);
        assert_eq!(settings.chunking.overlap, 50);
        assert_eq!(settings.embedding.dimension, 384);
        assert_eq!(settings.embedding.similarity_metric, SimilarityMetric::Cosine);
        assert_eq!(settings.retrieval.k, 3);
        assert_eq!(settings.retrieval.overfetch, 1);
        assert_eq!(settings.generation.provider, GenerationBackend::Extractive);
        assert_eq!(settings.logging.default, "warn");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
data_dir = "/tmp/kb"

[chunking]
max_chunk_size = 800
overlap = 80

[embedding]
similarity_metric = "dot"
dimension = 768

[retrieval]
k = 5
min_score = 0.4
"#;
        std::fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/kb"));
        assert_eq!(settings.chunking.max_chunk_size, 800);
        assert_eq!(settings.chunking.overlap, 80);
        assert_eq!(settings.embedding.similarity_metric, SimilarityMetric::Dot);
        assert_eq!(settings.embedding.dimension, 768);
        assert_eq!(settings.retrieval.k, 5);
        assert!((settings.retrieval.min_score - 0.4).abs() < f32::EPSILON);

        // Unset sections keep defaults
        assert_eq!(settings.embedding.max_batch_size, 64);
        assert_eq!(settings.provider.retry_count, 3);
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(".ragbase").join("settings.toml");

        let mut settings = Settings::default();
        settings.retrieval.k = 7;
        settings.ingest.clean_markdown = true;
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.retrieval.k, 7);
        assert!(loaded.ingest.clean_markdown);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.chunking.overlap = settings.chunking.max_chunk_size;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retrieval.k = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retrieval.min_score = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.chunking.max_chunk_size = 10_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_min_score_range_only_bounds_cosine() {
        let mut settings = Settings::default();
        settings.embedding.similarity_metric = SimilarityMetric::Dot;
        settings.retrieval.min_score = 5.0;
        assert!(settings.validate().is_ok());

        settings.retrieval.min_score = -12.5;
        assert!(settings.validate().is_ok());

        settings.retrieval.min_score = f32::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_retry_policies() {
        let provider = ProviderPolicyConfig {
            timeout_ms: 1_000,
            retry_count: 2,
            base_delay_ms: 10,
        };
        let embedding = provider.embedding_policy();
        assert_eq!(embedding.max_attempts(), 3);
        assert_eq!(embedding.timeout(), Duration::from_secs(1));

        let generation = provider.generation_policy();
        assert_eq!(generation.max_attempts(), 1);
    }
}
