use crate::chunking::approx_tokens;
use crate::error::AnswerError;
use crate::ingest::KnowledgeBase;
use crate::models::{
    Answer, AnswerMeta, Chunk, ChunkScore, ExactMatch, GenerationOptions, MatchReason, Retrieval,
    ScoredChunk,
};
use crate::traits::{CompletionProvider, CompletionRequest};
use std::sync::Arc;
use tracing::{debug, info};

pub const NO_RELEVANT_INFO: &str = "No relevant info found.";
pub const LOW_CONFIDENCE_ANSWER: &str =
    "I could not find a confident answer to that in the document. Please rephrase or ask about another topic.";

const EXACT_SYSTEM_PROMPT: &str = "You are a helpful assistant for the loaded document. Answer using only the context. \
     If unsure, say so and include the source chunk id and page.";
const RANKED_SYSTEM_PROMPT: &str = "You are a helpful assistant for the loaded document. Use only the provided context to answer. \
     If unsure, say so and include the source chunk id and page.";

/// Answers questions from retrieved context through an external completion provider.
pub struct AnswerOrchestrator {
    knowledge: Arc<KnowledgeBase>,
    completion: Arc<dyn CompletionProvider>,
    options: GenerationOptions,
}

impl AnswerOrchestrator {
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        completion: Arc<dyn CompletionProvider>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            knowledge,
            completion,
            options,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, AnswerError> {
        if question.trim().is_empty() {
            return Err(AnswerError::Validation("No question provided".to_string()));
        }

        let retrieval = self
            .knowledge
            .retrieve(question)
            .await
            .ok_or(AnswerError::NotReady)??;

        match retrieval {
            Retrieval::Exact(found) => self.answer_exact(question, found).await,
            Retrieval::Ranked(ranked) if !ranked.is_empty() => {
                self.answer_ranked(question, ranked).await
            }
            Retrieval::Ranked(_) | Retrieval::Empty => Ok(Answer {
                answer: NO_RELEVANT_INFO.to_string(),
                meta: AnswerMeta::NoMatch,
            }),
        }
    }

    async fn answer_exact(&self, question: &str, found: ExactMatch) -> Result<Answer, AnswerError> {
        let context = context_block(&found.chunk);
        let answer = self.complete(EXACT_SYSTEM_PROMPT, &context, question).await?;

        let chunk_id = found.chunk.id;
        let page = found.chunk.page;
        let meta = match found.reason {
            MatchReason::Phrase(phrase) => {
                info!(%phrase, %chunk_id, "answered from phrase match");
                AnswerMeta::PhraseMatch {
                    phrase,
                    chunk_id,
                    page,
                }
            }
            MatchReason::Keyword(match_count) => {
                info!(match_count, %chunk_id, "answered from keyword match");
                AnswerMeta::KeywordMatch {
                    match_count,
                    chunk_id,
                    page,
                }
            }
        };

        Ok(Answer { answer, meta })
    }

    async fn answer_ranked(
        &self,
        question: &str,
        ranked: Vec<ScoredChunk>,
    ) -> Result<Answer, AnswerError> {
        let top_score = ranked.first().map(|hit| hit.score).unwrap_or_default();
        let low_confidence = top_score < self.options.confidence_threshold;
        let top_chunks = ranked
            .iter()
            .map(|hit| ChunkScore {
                id: hit.chunk.id.clone(),
                page: hit.chunk.page,
                score: hit.score,
            })
            .collect::<Vec<_>>();

        if low_confidence && self.options.escalate_on_low_confidence {
            info!(top_score, threshold = self.options.confidence_threshold, "deferring low confidence answer");
            return Ok(Answer {
                answer: LOW_CONFIDENCE_ANSWER.to_string(),
                meta: AnswerMeta::EmbeddingRetrieval {
                    top_chunks,
                    low_confidence,
                },
            });
        }

        let context = self.budgeted_context(&ranked);
        let answer = self.complete(RANKED_SYSTEM_PROMPT, &context, question).await?;
        info!(top_score, low_confidence, "answered from embedding retrieval");

        Ok(Answer {
            answer,
            meta: AnswerMeta::EmbeddingRetrieval {
                top_chunks,
                low_confidence,
            },
        })
    }

    /// Ranked chunks in order while the prompt stays within `max_prompt_tokens`; the best
    /// chunk is always kept.
    fn budgeted_context(&self, ranked: &[ScoredChunk]) -> String {
        let mut blocks: Vec<String> = Vec::new();
        let mut used = 0usize;

        for hit in ranked {
            let block = context_block(&hit.chunk);
            let cost = approx_tokens(&block);
            if !blocks.is_empty() && used + cost > self.options.max_prompt_tokens {
                debug!(kept = blocks.len(), dropped_from = %hit.chunk.id, "prompt budget reached");
                break;
            }
            used += cost;
            blocks.push(block);
        }

        blocks.join("\n")
    }

    async fn complete(&self, system: &str, context: &str, question: &str) -> Result<String, AnswerError> {
        let request = CompletionRequest {
            system: system.to_string(),
            user: user_turn(context, question),
            max_tokens: self.options.output_budget(),
        };
        Ok(self.completion.complete(&request).await?)
    }
}

fn context_block(chunk: &Chunk) -> String {
    format!("[Chunk {} | page:{}]\n{}", chunk.id, chunk.page, chunk.text)
}

fn user_turn(context: &str, question: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {question}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::extractor::{PageText, PdfExtractor};
    use crate::models::{IndexedChunk, IngestionOptions, RetrievalOptions, StoreSnapshot};
    use crate::retrieval::RetrievalEngine;
    use crate::store::save_snapshot_atomic;
    use crate::traits::Embedder;
    use crate::ingest::digest_file;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    struct NoPages;

    impl PdfExtractor for NoPages {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, crate::error::IngestError> {
            Ok(Vec::new())
        }
    }

    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector.clone())
        }
    }

    #[derive(Default)]
    struct RecordingCompletion {
        requests: Mutex<Vec<CompletionRequest>>,
        fail: bool,
    }

    impl RecordingCompletion {
        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().map(|guard| guard.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionProvider for RecordingCompletion {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
            if let Ok(mut guard) = self.requests.lock() {
                guard.push(request.clone());
            }
            if self.fail {
                return Err(ProviderError::BackendResponse {
                    backend: "completion".to_string(),
                    details: "503".to_string(),
                });
            }
            Ok("grounded answer".to_string())
        }
    }

    fn entry(index: u64, page: u32, text: &str, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                id: Chunk::sequence_id(index),
                text: text.to_string(),
                page,
                start_char: 0,
                end_char: text.chars().count(),
            },
            embedding,
        }
    }

    struct Fixture {
        _dir: TempDir,
        orchestrator: AnswerOrchestrator,
        embedder: Arc<FixedEmbedder>,
        completion: Arc<RecordingCompletion>,
    }

    /// Seeds a valid store so readiness loads it instead of extracting.
    async fn fixture(
        entries: Vec<IndexedChunk>,
        query_vector: Vec<f32>,
        completion: RecordingCompletion,
        options: GenerationOptions,
    ) -> Fixture {
        let dir = tempdir().expect("tempdir");
        let pdf_path = dir.path().join("doc.pdf");
        fs::write(&pdf_path, b"document bytes").expect("write pdf");
        let store_path = dir.path().join("embed_store.json");
        let hash = digest_file(&pdf_path).expect("hash");
        let snapshot = StoreSnapshot::from_entries(hash, Some("fixed".to_string()), &entries);
        save_snapshot_atomic(&store_path, &snapshot).expect("seed store");

        let embedder = Arc::new(FixedEmbedder {
            vector: query_vector,
            calls: AtomicUsize::new(0),
        });
        let completion = Arc::new(completion);
        let engine = RetrievalEngine::new(&RetrievalOptions::default()).expect("rules compile");
        let knowledge = Arc::new(KnowledgeBase::new(
            IngestionOptions {
                pdf_path,
                store_path,
                ..IngestionOptions::default()
            },
            Arc::new(NoPages),
            embedder.clone(),
            engine,
        ));
        knowledge.ensure_ready().await.expect("store loads");

        Fixture {
            _dir: dir,
            orchestrator: AnswerOrchestrator::new(knowledge, completion.clone(), options),
            embedder,
            completion,
        }
    }

    fn campus() -> Vec<IndexedChunk> {
        vec![
            entry(0, 1, "The Music Club meets Friday.", vec![1.0, 0.0]),
            entry(1, 2, "Exams start in May.", vec![0.0, 1.0]),
        ]
    }

    #[tokio::test]
    async fn phrase_question_is_answered_from_matching_chunk() -> Result<(), AnswerError> {
        let fx = fixture(campus(), vec![1.0, 0.0], RecordingCompletion::default(), GenerationOptions::default()).await;

        let answer = fx.orchestrator.ask("How do I join music club?").await?;

        assert_eq!(answer.answer, "grounded answer");
        assert_eq!(
            answer.meta,
            AnswerMeta::PhraseMatch {
                phrase: "music club".to_string(),
                chunk_id: "chunk_0".to_string(),
                page: 1,
            }
        );
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), 0);

        let requests = fx.completion.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].user.contains("[Chunk chunk_0 | page:1]\nThe Music Club meets Friday."));
        assert!(requests[0].user.ends_with("Question: How do I join music club?"));
        assert_eq!(requests[0].max_tokens, 120);
        Ok(())
    }

    #[tokio::test]
    async fn unmatched_question_uses_ranked_context() -> Result<(), AnswerError> {
        let entries = vec![
            entry(0, 1, "Orientation week schedule.", vec![0.0, 1.0]),
            entry(1, 1, "Hostel allotment process.", vec![0.6, 0.8]),
            entry(2, 2, "Sports ground booking.", vec![1.0, 0.0]),
        ];
        let fx = fixture(entries, vec![1.0, 0.0], RecordingCompletion::default(), GenerationOptions::default()).await;

        let answer = fx.orchestrator.ask("zzzz qqqq").await?;

        let AnswerMeta::EmbeddingRetrieval { top_chunks, low_confidence } = answer.meta else {
            panic!("expected embedding retrieval");
        };
        let ids = top_chunks.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["chunk_2", "chunk_1", "chunk_0"]);
        assert!(!low_confidence);

        let requests = fx.completion.requests();
        let user = &requests[0].user;
        let first = user.find("chunk_2").expect("best chunk in context");
        let last = user.find("chunk_0").expect("worst chunk in context");
        assert!(first < last);
        Ok(())
    }

    #[tokio::test]
    async fn low_confidence_can_defer_without_completion() -> Result<(), AnswerError> {
        let options = GenerationOptions {
            escalate_on_low_confidence: true,
            ..GenerationOptions::default()
        };
        let entries = vec![entry(0, 1, "Orientation week schedule.", vec![0.0, 1.0])];
        let fx = fixture(entries, vec![1.0, 0.2], RecordingCompletion::default(), options).await;

        let answer = fx.orchestrator.ask("zzzz qqqq").await?;

        assert_eq!(answer.answer, LOW_CONFIDENCE_ANSWER);
        assert!(matches!(
            answer.meta,
            AnswerMeta::EmbeddingRetrieval { low_confidence: true, .. }
        ));
        assert!(fx.completion.requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn prompt_budget_keeps_best_chunk_only() -> Result<(), AnswerError> {
        let options = GenerationOptions {
            max_prompt_tokens: 10,
            ..GenerationOptions::default()
        };
        let entries = vec![
            entry(0, 1, "Orientation week schedule and venues.", vec![0.0, 1.0]),
            entry(1, 1, "Sports ground booking and fees.", vec![1.0, 0.0]),
        ];
        let fx = fixture(entries, vec![1.0, 0.0], RecordingCompletion::default(), options).await;

        fx.orchestrator.ask("zzzz qqqq").await?;

        let requests = fx.completion.requests();
        assert!(requests[0].user.contains("chunk_1"));
        assert!(!requests[0].user.contains("chunk_0"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_document_reports_no_relevant_info() -> Result<(), AnswerError> {
        let fx = fixture(Vec::new(), vec![1.0], RecordingCompletion::default(), GenerationOptions::default()).await;

        let answer = fx.orchestrator.ask("anything here?").await?;

        assert_eq!(answer.answer, NO_RELEVANT_INFO);
        assert_eq!(answer.meta, AnswerMeta::NoMatch);
        assert!(fx.completion.requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let fx = fixture(campus(), vec![1.0, 0.0], RecordingCompletion::default(), GenerationOptions::default()).await;
        let result = fx.orchestrator.ask("   ").await;
        assert!(matches!(result, Err(AnswerError::Validation(_))));
    }

    #[tokio::test]
    async fn completion_failure_is_reported() {
        let completion = RecordingCompletion {
            fail: true,
            ..RecordingCompletion::default()
        };
        let fx = fixture(campus(), vec![1.0, 0.0], completion, GenerationOptions::default()).await;

        let result = fx.orchestrator.ask("How do I join music club?").await;
        assert!(matches!(result, Err(AnswerError::Provider(_))));
    }

    #[tokio::test]
    async fn questions_before_readiness_are_refused() {
        let engine = RetrievalEngine::new(&RetrievalOptions::default()).expect("rules compile");
        let knowledge = Arc::new(KnowledgeBase::new(
            IngestionOptions::default(),
            Arc::new(NoPages),
            Arc::new(FixedEmbedder {
                vector: vec![1.0],
                calls: AtomicUsize::new(0),
            }),
            engine,
        ));
        let orchestrator = AnswerOrchestrator::new(
            knowledge,
            Arc::new(RecordingCompletion::default()),
            GenerationOptions::default(),
        );

        let result = orchestrator.ask("music club?").await;
        assert!(matches!(result, Err(AnswerError::NotReady)));
    }
}
