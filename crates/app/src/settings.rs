use anyhow::Context;
use clap::Args;
use pdf_answer_core::{
    CharacterNgramEmbedder, ChatCompletionClient, ChunkingConfig, CompletionProvider, ConfigError,
    Embedder, GenerationOptions, HttpEmbedder, IngestionOptions, KnowledgeBase, LopdfExtractor,
    RetrievalEngine, RetrievalOptions, DEFAULT_COMPLETION_MODEL, DEFAULT_COMPLETION_URL,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_HTTP_EMBEDDING_DIMENSIONS: usize = 1536;

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// PDF document to answer questions about
    #[arg(long, env = "PDF_PATH", default_value = "./sample.pdf")]
    pub pdf_path: PathBuf,

    /// Persisted chunk and embedding store
    #[arg(long, env = "EMBED_STORE_PATH", default_value = "./embed_store.json")]
    pub store_path: PathBuf,

    /// Soft token budget per chunk
    #[arg(long, env = "CHUNK_TOKEN_SIZE", default_value_t = 500)]
    pub chunk_tokens: usize,

    /// Tokens carried over from the previous chunk
    #[arg(long, env = "CHUNK_OVERLAP_TOKENS", default_value_t = 100)]
    pub chunk_overlap_tokens: usize,

    /// Chunks handed to the completion provider on embedding fallback
    #[arg(long, env = "RETRIEVAL_TOP_K", default_value_t = 6)]
    pub top_k: usize,

    /// Keywords that end a domain phrase, e.g. "Club"
    #[arg(long, env = "PHRASE_SUFFIXES", value_delimiter = ',', default_value = "Club")]
    pub phrase_suffixes: Vec<String>,

    /// Minimum top similarity for a confident answer
    #[arg(long, env = "CONFIDENCE_THRESHOLD", default_value_t = 0.65)]
    pub confidence_threshold: f32,

    /// Defer instead of answering when similarity is below the threshold
    #[arg(long, env = "ESCALATE_ON_LOW_CONF", default_value_t = false)]
    pub escalate_on_low_confidence: bool,

    #[arg(long, env = "DESIRED_OUTPUT_TOKENS", default_value_t = 120)]
    pub desired_output_tokens: usize,

    #[arg(long, env = "MIN_OUTPUT_TOKENS", default_value_t = 16)]
    pub min_output_tokens: usize,

    /// Token budget for the context block of a prompt
    #[arg(long, env = "MAX_PROMPT_TOKENS", default_value_t = 4000)]
    pub max_prompt_tokens: usize,

    /// OpenAI-compatible chat completions URL
    #[arg(long, env = "COMPLETION_URL", default_value = DEFAULT_COMPLETION_URL)]
    pub completion_url: String,

    #[arg(long, env = "COMPLETION_MODEL", default_value = DEFAULT_COMPLETION_MODEL)]
    pub completion_model: String,

    #[arg(long, env = "OPENROUTER_KEY", hide_env_values = true)]
    pub completion_api_key: Option<String>,

    /// OpenAI-compatible embeddings base URL; the local trigram embedder is used when unset
    #[arg(long, env = "EMBEDDING_URL")]
    pub embedding_url: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    #[arg(long, env = "EMBEDDING_DIMENSIONS")]
    pub embedding_dimensions: Option<usize>,

    /// Seconds before provider requests time out
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = 60)]
    pub provider_timeout_secs: u64,
}

impl Settings {
    pub fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            pdf_path: self.pdf_path.clone(),
            store_path: self.store_path.clone(),
            chunking: ChunkingConfig {
                target_tokens: self.chunk_tokens,
                overlap_tokens: self.chunk_overlap_tokens,
            },
            ..IngestionOptions::default()
        }
    }

    pub fn retrieval_options(&self) -> Result<RetrievalOptions, ConfigError> {
        let options = RetrievalOptions {
            top_k: self.top_k,
            phrase_suffixes: self
                .phrase_suffixes
                .iter()
                .map(|suffix| suffix.trim().to_string())
                .collect(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn generation_options(&self) -> Result<GenerationOptions, ConfigError> {
        let options = GenerationOptions {
            confidence_threshold: self.confidence_threshold,
            escalate_on_low_confidence: self.escalate_on_low_confidence,
            desired_output_tokens: self.desired_output_tokens,
            min_output_tokens: self.min_output_tokens,
            max_prompt_tokens: self.max_prompt_tokens,
        };
        options.validate()?;
        Ok(options)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    pub fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        let Some(endpoint) = non_blank(self.embedding_url.as_deref()) else {
            let dimensions = self
                .embedding_dimensions
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
            return Ok(Arc::new(CharacterNgramEmbedder { dimensions }));
        };

        Url::parse(endpoint).map_err(ConfigError::from)?;
        let embedder = HttpEmbedder::new(
            endpoint,
            non_blank(self.embedding_api_key.as_deref()).map(str::to_string),
            &self.embedding_model,
            self.embedding_dimensions
                .unwrap_or(DEFAULT_HTTP_EMBEDDING_DIMENSIONS),
            self.timeout(),
        )
        .context("failed to build embedding client")?;
        Ok(Arc::new(embedder))
    }

    /// The completion client. A missing key is fatal before anything is served.
    pub fn completion_provider(&self) -> anyhow::Result<Arc<dyn CompletionProvider>> {
        let api_key = non_blank(self.completion_api_key.as_deref())
            .ok_or_else(|| ConfigError::Missing("OPENROUTER_KEY".to_string()))?;
        Url::parse(&self.completion_url).map_err(ConfigError::from)?;

        let client = ChatCompletionClient::new(
            &self.completion_url,
            api_key,
            &self.completion_model,
            self.timeout(),
        )
        .context("failed to build completion client")?;
        Ok(Arc::new(client))
    }

    pub fn knowledge_base(&self) -> anyhow::Result<Arc<KnowledgeBase>> {
        let ingestion = self.ingestion_options();
        ingestion.chunking.validate()?;
        let engine = RetrievalEngine::new(&self.retrieval_options()?)
            .context("invalid phrase suffix pattern")?;

        Ok(Arc::new(KnowledgeBase::new(
            ingestion,
            Arc::new(LopdfExtractor),
            self.embedder()?,
            engine,
        )))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
