use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source document not found: {0}")]
    SourceMissing(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf text seems empty or failed to load: {path} yielded {chars} characters")]
    InsufficientText { path: String, chars: usize },

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("embedding provider failed during ingestion: {0}")]
    Provider(#[from] ProviderError),

    #[error("store write failed: {0}")]
    Store(#[from] StoreError),

    #[error("ingestion task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{0} returned no usable output")]
    EmptyResponse(String),

    #[error("embedding dimension {actual} does not match expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("{0}")]
    Validation(String),

    #[error("knowledge base is not ready yet")]
    NotReady,

    #[error("could not get an answer: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
