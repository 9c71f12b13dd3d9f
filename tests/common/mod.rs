//! Shared fixtures for integration tests: settings and scripted providers.

#![allow(dead_code)]

use async_trait::async_trait;
use ragbase::providers::{ExtractiveGenerator, HashingEmbedder};
use ragbase::{
    EmbeddingProvider, GenerationProvider, KnowledgeService, ProviderError, Settings,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const DIM: usize = 384;

/// Settings rooted in `dir` with fast provider timeouts.
pub fn test_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.data_dir = dir.path().join("data");
    settings.embedding.dimension = DIM;
    settings.provider.timeout_ms = 2_000;
    settings.provider.retry_count = 1;
    settings.provider.base_delay_ms = 1;
    settings
}

pub async fn open_with(
    settings: Settings,
    embedder: impl EmbeddingProvider + 'static,
) -> KnowledgeService {
    KnowledgeService::open(
        settings,
        Arc::new(embedder),
        Arc::new(ExtractiveGenerator::new()),
    )
    .await
    .expect("service should open")
}

pub async fn open_default(dir: &TempDir) -> KnowledgeService {
    open_with(test_settings(dir), HashingEmbedder::new(DIM, 8192)).await
}

/// Always unavailable.
pub struct FailingEmbedder {
    pub calls: AtomicU32,
}

impl FailingEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn model(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn max_input_chars(&self) -> usize {
        8192
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Unavailable("connection refused".to_string()))
    }
}

/// Fails the first `failures` calls, then embeds with feature hashing.
pub struct FlakyEmbedder {
    inner: HashingEmbedder,
    remaining_failures: AtomicU32,
    error: ProviderError,
    pub calls: Arc<AtomicU32>,
}

impl FlakyEmbedder {
    pub fn new(failures: u32, error: ProviderError) -> Self {
        Self {
            inner: HashingEmbedder::new(DIM, 8192),
            remaining_failures: AtomicU32::new(failures),
            error,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn name(&self) -> &str {
        "flaky"
    }

    fn model(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn max_input_chars(&self) -> usize {
        8192
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(self.error.clone());
        }
        self.inner.embed(texts).await
    }
}

/// Never answers within any reasonable timeout.
pub struct StallingEmbedder {
    pub stall: Duration,
}

#[async_trait]
impl EmbeddingProvider for StallingEmbedder {
    fn name(&self) -> &str {
        "stalling"
    }

    fn model(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn max_input_chars(&self) -> usize {
        8192
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        tokio::time::sleep(self.stall).await;
        Ok(texts.iter().map(|_| vec![0.0; DIM]).collect())
    }
}

/// Claims the configured dimension but returns shorter vectors.
pub struct WrongDimensionEmbedder;

#[async_trait]
impl EmbeddingProvider for WrongDimensionEmbedder {
    fn name(&self) -> &str {
        "wrong-dimension"
    }

    fn model(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn max_input_chars(&self) -> usize {
        8192
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|_| vec![0.5; DIM / 2]).collect())
    }
}

/// Returns a fixed answer, or a fixed error.
pub struct ScriptedGenerator {
    pub reply: Result<String, ProviderError>,
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.reply.clone()
    }
}

/// Replaces the records directory with a plain file so every record write
/// and removal fails, until [`BlockedRecords::release`] puts it back.
pub struct BlockedRecords {
    records: PathBuf,
    parked: PathBuf,
}

pub fn block_record_writes(dir: &TempDir) -> BlockedRecords {
    let records = dir.path().join("data").join("documents");
    let parked = dir.path().join("data").join("documents.parked");
    std::fs::rename(&records, &parked).expect("park records dir");
    std::fs::write(&records, b"").expect("place blocking file");
    BlockedRecords { records, parked }
}

impl BlockedRecords {
    pub fn release(self) {
        std::fs::remove_file(&self.records).expect("remove blocking file");
        std::fs::rename(&self.parked, &self.records).expect("restore records dir");
    }
}
