pub mod chunking;
pub mod completion;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod store;
pub mod traits;

pub use chunking::{approx_tokens, chunk_pages, normalize_whitespace, CHARS_PER_TOKEN};
pub use completion::{ChatCompletionClient, DEFAULT_COMPLETION_MODEL, DEFAULT_COMPLETION_URL};
pub use embeddings::{
    cosine_similarity, l2_normalize, CharacterNgramEmbedder, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{AnswerError, ConfigError, IngestError, ProviderError, StoreError};
pub use extractor::{extract_document, ExtractedDocument, LopdfExtractor, PageText, PdfExtractor, TextCleaner};
pub use ingest::{digest_file, load_or_rebuild, IndexSource, IngestionReport, KnowledgeBase};
pub use models::{
    Answer, AnswerMeta, Chunk, ChunkPreview, ChunkScore, ChunkingConfig, ExactMatch,
    GenerationOptions, IndexedChunk, IngestionOptions, MatchReason, Retrieval, RetrievalOptions,
    ScoredChunk, StoreSnapshot,
};
pub use orchestrator::{AnswerOrchestrator, LOW_CONFIDENCE_ANSWER, NO_RELEVANT_INFO};
pub use retrieval::{KnowledgeIndex, RetrievalEngine, SuffixPhraseRule};
pub use store::{load_snapshot, save_snapshot_atomic};
pub use traits::{CompletionProvider, CompletionRequest, Embedder, PhraseRule};
