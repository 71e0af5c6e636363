use crate::error::ProviderError;
use async_trait::async_trait;

/// Maps text to a fixed-length vector. Loaded once and shared by ingestion and queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: usize,
}

/// Turns a grounded prompt into answer text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Pulls candidate domain phrases (e.g. "music club") out of chunk text.
pub trait PhraseRule: Send + Sync {
    fn extract(&self, text: &str) -> Vec<String>;
}
