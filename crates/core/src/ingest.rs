use crate::chunking::chunk_pages;
use crate::error::{IngestError, ProviderError};
use crate::extractor::{extract_document, PdfExtractor};
use crate::models::{ChunkPreview, IndexedChunk, IngestionOptions, Retrieval, StoreSnapshot};
use crate::retrieval::{KnowledgeIndex, RetrievalEngine};
use crate::store::{load_snapshot, save_snapshot_atomic};
use crate::traits::Embedder;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

const SNIPPET_CHARS: usize = 400;

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// A snapshot is reusable only for the same document bytes, with aligned arrays whose
/// vectors all have the embedder's width, built by the same embedding model when the store
/// recorded one.
pub fn snapshot_is_current(snapshot: &StoreSnapshot, source_hash: &str, embedder: &dyn Embedder) -> bool {
    snapshot.source_hash == source_hash
        && snapshot.is_aligned()
        && snapshot
            .embeddings
            .iter()
            .all(|vector| vector.len() == embedder.dimensions())
        && snapshot
            .embedding_model
            .as_deref()
            .map_or(true, |model| model == embedder.model_name())
}

/// Runs filesystem or CPU-bound work off the async executor.
async fn run_blocking<T, F>(task: F) -> Result<T, IngestError>
where
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| IngestError::Task(error.to_string()))?
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    Store,
    Rebuilt,
}

pub struct IngestionReport {
    pub entries: Vec<IndexedChunk>,
    pub source: IndexSource,
}

/// Extract, chunk and embed the document, then persist it. Nothing is written unless every
/// step succeeded.
pub async fn rebuild_store(
    options: &IngestionOptions,
    extractor: Arc<dyn PdfExtractor + Send + Sync>,
    embedder: &dyn Embedder,
    source_hash: &str,
) -> Result<Vec<IndexedChunk>, IngestError> {
    let pdf_path = options.pdf_path.clone();
    let min_text_chars = options.min_text_chars;
    let document =
        run_blocking(move || extract_document(extractor.as_ref(), &pdf_path, min_text_chars)).await?;

    info!(pages = document.pages.len(), chars = document.full_text.len(), "pdf extracted");

    let chunks = chunk_pages(&document.pages, options.chunking)?;
    info!(chunk_count = chunks.len(), "chunks created");

    let mut entries = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let embedding = embedder.embed(&chunk.text).await?;
        entries.push(IndexedChunk { chunk, embedding });
    }
    info!(chunk_count = entries.len(), model = embedder.model_name(), "embeddings generated");

    let snapshot = StoreSnapshot::from_entries(
        source_hash,
        Some(embedder.model_name().to_string()),
        &entries,
    );
    let store_path = options.store_path.clone();
    run_blocking(move || Ok(save_snapshot_atomic(&store_path, &snapshot)?)).await?;
    info!(path = %options.store_path.display(), "persisted embeddings");

    Ok(entries)
}

/// Reuse the persisted store when it matches the document, otherwise rebuild it.
pub async fn load_or_rebuild(
    options: &IngestionOptions,
    extractor: Arc<dyn PdfExtractor + Send + Sync>,
    embedder: &dyn Embedder,
) -> Result<IngestionReport, IngestError> {
    options.chunking.validate()?;

    if !options.pdf_path.is_file() {
        return Err(IngestError::SourceMissing(options.pdf_path.display().to_string()));
    }

    let pdf_path = options.pdf_path.clone();
    let source_hash = run_blocking(move || digest_file(&pdf_path)).await?;
    let store_path = options.store_path.clone();
    let existing = run_blocking(move || Ok(load_snapshot(&store_path)))
        .await?
        .filter(|snapshot| snapshot_is_current(snapshot, &source_hash, embedder))
        .and_then(StoreSnapshot::into_entries);

    if let Some(entries) = existing {
        info!(chunk_count = entries.len(), "found persisted embeddings, loading from store");
        return Ok(IngestionReport {
            entries,
            source: IndexSource::Store,
        });
    }

    info!("no valid persisted store found or pdf changed, rebuilding embeddings");
    let entries = rebuild_store(options, extractor, embedder, &source_hash).await?;
    Ok(IngestionReport {
        entries,
        source: IndexSource::Rebuilt,
    })
}

/// The loaded document index plus the handles needed to query it.
///
/// `ensure_ready` performs ingestion at most once; every later call, including concurrent
/// ones, observes the same index.
pub struct KnowledgeBase {
    options: IngestionOptions,
    extractor: Arc<dyn PdfExtractor + Send + Sync>,
    embedder: Arc<dyn Embedder>,
    engine: RetrievalEngine,
    index: OnceCell<KnowledgeIndex>,
    source: OnceCell<IndexSource>,
}

impl KnowledgeBase {
    pub fn new(
        options: IngestionOptions,
        extractor: Arc<dyn PdfExtractor + Send + Sync>,
        embedder: Arc<dyn Embedder>,
        engine: RetrievalEngine,
    ) -> Self {
        Self {
            options,
            extractor,
            embedder,
            engine,
            index: OnceCell::new(),
            source: OnceCell::new(),
        }
    }

    pub async fn ensure_ready(&self) -> Result<&KnowledgeIndex, IngestError> {
        self.index
            .get_or_try_init(|| async {
                info!(pdf = %self.options.pdf_path.display(), "initialising knowledge base");
                let report =
                    load_or_rebuild(&self.options, self.extractor.clone(), self.embedder.as_ref())
                        .await?;
                let _ = self.source.set(report.source);
                let index = self.engine.build_index(report.entries);
                info!(
                    chunk_count = index.len(),
                    phrase_count = index.phrases().len(),
                    "knowledge base ready"
                );
                Ok::<_, IngestError>(index)
            })
            .await
    }

    pub fn index(&self) -> Option<&KnowledgeIndex> {
        self.index.get()
    }

    pub fn is_ready(&self) -> bool {
        self.index.initialized()
    }

    pub fn source(&self) -> Option<IndexSource> {
        self.source.get().copied()
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Runs both retrieval stages for `query`. `None` before the index is loaded.
    pub async fn retrieve(&self, query: &str) -> Option<Result<Retrieval, ProviderError>> {
        let index = self.index()?;
        Some(self.engine.retrieve(index, query, self.embedder.as_ref()).await)
    }

    /// The first `top` chunks with their text cut to a snippet.
    pub fn preview(&self, top: usize) -> Vec<ChunkPreview> {
        self.index()
            .map(|index| {
                index
                    .entries()
                    .iter()
                    .take(top)
                    .map(|entry| ChunkPreview {
                        id: entry.chunk.id.clone(),
                        page: entry.chunk.page,
                        snippet: snippet(&entry.chunk.text),
                        score: None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ranks every chunk against `query` by embedding similarity alone.
    pub async fn similarity(&self, query: &str, top: usize) -> Result<Vec<ChunkPreview>, ProviderError> {
        let Some(index) = self.index() else {
            return Ok(Vec::new());
        };

        let normalized = self.engine.normalize_query(query);
        let query_vector = self.embedder.embed(&normalized).await?;
        Ok(self
            .engine
            .rank(index, &query_vector, top)
            .into_iter()
            .map(|hit| ChunkPreview {
                snippet: snippet(&hit.chunk.text),
                id: hit.chunk.id,
                page: hit.chunk.page,
                score: Some(hit.score),
            })
            .collect())
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}
