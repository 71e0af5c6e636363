use crate::error::{ConfigError, IngestError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A sentence-aligned slice of one page, as produced during ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub page: u32,
    pub start_char: usize,
    pub end_char: usize,
}

impl Chunk {
    pub fn sequence_id(index: u64) -> String {
        format!("chunk_{index}")
    }
}

/// A chunk bound to its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Persisted form of the index. Chunks and vectors are kept as parallel arrays on disk;
/// `embeddings[i]` belongs to `chunks[i]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(alias = "pdfHash")]
    pub source_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub chunks: Vec<Chunk>,
    pub embeddings: Vec<Vec<f32>>,
}

impl StoreSnapshot {
    pub fn from_entries(
        source_hash: impl Into<String>,
        embedding_model: Option<String>,
        entries: &[IndexedChunk],
    ) -> Self {
        let (chunks, embeddings) = entries
            .iter()
            .map(|entry| (entry.chunk.clone(), entry.embedding.clone()))
            .unzip();

        Self {
            source_hash: source_hash.into(),
            created_at: Utc::now(),
            embedding_model,
            chunks,
            embeddings,
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.chunks.len() == self.embeddings.len()
    }

    /// Pairs every chunk with its vector. Returns `None` when the arrays drifted apart.
    pub fn into_entries(self) -> Option<Vec<IndexedChunk>> {
        if !self.is_aligned() {
            return None;
        }

        Some(
            self.chunks
                .into_iter()
                .zip(self.embeddings)
                .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 500,
            overlap_tokens: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.target_tokens == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "target tokens must be greater than zero".to_string(),
            ));
        }
        if self.overlap_tokens >= self.target_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap tokens {} must be smaller than target tokens {}",
                self.overlap_tokens, self.target_tokens
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub pdf_path: PathBuf,
    pub store_path: PathBuf,
    pub chunking: ChunkingConfig,
    pub min_text_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            pdf_path: PathBuf::from("./sample.pdf"),
            store_path: PathBuf::from("./embed_store.json"),
            chunking: ChunkingConfig::default(),
            min_text_chars: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub phrase_suffixes: Vec<String>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 6,
            phrase_suffixes: vec!["Club".to_string()],
        }
    }
}

impl RetrievalOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval top_k must be at least 1".to_string()));
        }
        if self.phrase_suffixes.iter().any(|suffix| suffix.trim().is_empty()) {
            return Err(ConfigError::Invalid("phrase suffixes must not be blank".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub confidence_threshold: f32,
    pub escalate_on_low_confidence: bool,
    pub desired_output_tokens: usize,
    pub min_output_tokens: usize,
    pub max_prompt_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.65,
            escalate_on_low_confidence: false,
            desired_output_tokens: 120,
            min_output_tokens: 16,
            max_prompt_tokens: 4_000,
        }
    }
}

impl GenerationOptions {
    pub fn output_budget(&self) -> usize {
        self.desired_output_tokens.max(self.min_output_tokens)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence threshold {} is outside [-1, 1]",
                self.confidence_threshold
            )));
        }
        if self.output_budget() == 0 {
            return Err(ConfigError::Invalid("output token budget must be positive".to_string()));
        }
        if self.max_prompt_tokens == 0 {
            return Err(ConfigError::Invalid("max prompt tokens must be positive".to_string()));
        }
        Ok(())
    }
}

/// How a stage-one hit was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReason {
    Phrase(String),
    Keyword(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExactMatch {
    pub chunk: Chunk,
    pub reason: MatchReason,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Exact(ExactMatch),
    Ranked(Vec<ScoredChunk>),
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkScore {
    pub id: String,
    pub page: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AnswerMeta {
    PhraseMatch {
        phrase: String,
        chunk_id: String,
        page: u32,
    },
    KeywordMatch {
        match_count: usize,
        chunk_id: String,
        page: u32,
    },
    EmbeddingRetrieval {
        top_chunks: Vec<ChunkScore>,
        low_confidence: bool,
    },
    NoMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub meta: AnswerMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPreview {
    pub id: String,
    pub page: u32,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}
