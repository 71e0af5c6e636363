use crate::embeddings::cosine_similarity;
use crate::error::ProviderError;
use crate::models::{ExactMatch, IndexedChunk, MatchReason, Retrieval, RetrievalOptions, ScoredChunk};
use crate::traits::{Embedder, PhraseRule};
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

const STOP_WORDS: [&str; 33] = [
    "who", "what", "when", "where", "why", "how", "should", "i", "to", "be", "a", "the", "in",
    "of", "for", "is", "are", "me", "with", "please", "want", "join", "part", "contact", "do",
    "does", "can", "on", "at", "and", "or", "by", "from",
];

const MIN_TERM_CHARS: usize = 3;

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Finds phrases that end in an organisational keyword, such as "music club" for "Club".
///
/// Each match yields every qualifier run of up to `max_words` words ending in the keyword,
/// skipping runs that start with a stop word.
pub struct SuffixPhraseRule {
    keyword: String,
    pattern: Regex,
    max_words: usize,
}

impl SuffixPhraseRule {
    pub fn new(keyword: &str) -> Result<Self, regex::Error> {
        let keyword = keyword.trim();
        let pattern = Regex::new(&format!(
            r"(?i)(?:\d+\.\s*)?([A-Za-z&'’\-\s]{{2,}}{})\b",
            regex::escape(keyword)
        ))?;

        Ok(Self {
            keyword: keyword.to_lowercase(),
            pattern,
            max_words: 4,
        })
    }
}

impl PhraseRule for SuffixPhraseRule {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut phrases = Vec::new();

        for capture in self.pattern.captures_iter(text) {
            let Some(found) = capture.get(1) else {
                continue;
            };
            let words = found
                .as_str()
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>();

            let mut boundary = 0;
            for (end, word) in words.iter().enumerate() {
                if *word != self.keyword {
                    continue;
                }

                let earliest = boundary.max((end + 1).saturating_sub(self.max_words));
                for start in (earliest..end).rev() {
                    if is_stop_word(&words[start]) {
                        continue;
                    }
                    phrases.push(words[start..=end].join(" "));
                }
                boundary = end + 1;
            }
        }

        phrases
    }
}

/// Chunks paired with their vectors plus the phrase catalog extracted from them.
pub struct KnowledgeIndex {
    entries: Vec<IndexedChunk>,
    phrases: Vec<String>,
}

impl KnowledgeIndex {
    pub fn entries(&self) -> &[IndexedChunk] {
        &self.entries
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct RetrievalEngine {
    rules: Vec<Box<dyn PhraseRule>>,
    top_k: usize,
    control_re: Regex,
    term_re: Regex,
}

impl RetrievalEngine {
    pub fn new(options: &RetrievalOptions) -> Result<Self, regex::Error> {
        let rules = options
            .phrase_suffixes
            .iter()
            .map(|suffix| SuffixPhraseRule::new(suffix).map(|rule| Box::new(rule) as Box<dyn PhraseRule>))
            .collect::<Result<Vec<_>, _>>()?;

        Self::with_rules(rules, options.top_k)
    }

    pub fn with_rules(rules: Vec<Box<dyn PhraseRule>>, top_k: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            rules,
            top_k: top_k.max(1),
            control_re: Regex::new(r"[\x00-\x1F\x7F]+")?,
            term_re: Regex::new(r"\b[a-z0-9]+\b")?,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn build_index(&self, entries: Vec<IndexedChunk>) -> KnowledgeIndex {
        let mut seen = HashSet::new();
        let mut phrases = Vec::new();

        for entry in &entries {
            let text = entry.chunk.text.replace(['\r', '\t'], " ");
            for rule in &self.rules {
                for phrase in rule.extract(&text) {
                    let phrase = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
                    if !phrase.is_empty() && seen.insert(phrase.clone()) {
                        phrases.push(phrase);
                    }
                }
            }
        }

        KnowledgeIndex { entries, phrases }
    }

    /// NFKC, control characters to spaces, collapsed whitespace, lowercase.
    pub fn normalize_query(&self, raw: &str) -> String {
        let text: String = raw.nfkc().collect();
        let text = self.control_re.replace_all(&text, " ");
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Query words worth matching, in order. Repeats are kept and each one counts.
    pub fn search_terms(&self, normalized_query: &str) -> Vec<String> {
        self.term_re
            .find_iter(normalized_query)
            .map(|term| term.as_str())
            .filter(|term| term.len() >= MIN_TERM_CHARS && !is_stop_word(term))
            .map(str::to_string)
            .collect()
    }

    /// Stage one: a catalog phrase named in the query, else the chunk sharing the most terms.
    pub fn exact_match(&self, index: &KnowledgeIndex, normalized_query: &str) -> Option<ExactMatch> {
        let phrase = index
            .phrases
            .iter()
            .filter(|phrase| normalized_query.contains(phrase.as_str()))
            .fold(None::<&String>, |best, phrase| match best {
                Some(current) if current.len() >= phrase.len() => Some(current),
                _ => Some(phrase),
            });

        if let Some(phrase) = phrase {
            let hit = index
                .entries
                .iter()
                .find(|entry| entry.chunk.text.to_lowercase().contains(phrase.as_str()));
            if let Some(entry) = hit {
                return Some(ExactMatch {
                    chunk: entry.chunk.clone(),
                    reason: MatchReason::Phrase(phrase.clone()),
                });
            }
        }

        let terms = self.search_terms(normalized_query);
        if terms.is_empty() {
            return None;
        }

        let mut best: Option<(&IndexedChunk, usize)> = None;
        for entry in &index.entries {
            let lowered = entry.chunk.text.to_lowercase();
            let hits = terms
                .iter()
                .filter(|term| lowered.contains(term.as_str()))
                .count();
            if best.map_or(true, |(_, best_hits)| hits > best_hits) {
                best = Some((entry, hits));
            }
        }

        match best {
            Some((entry, hits)) if hits > 0 => Some(ExactMatch {
                chunk: entry.chunk.clone(),
                reason: MatchReason::Keyword(hits),
            }),
            _ => None,
        }
    }

    /// Scores every chunk against `query_vector`, best first; equal scores keep chunk order.
    pub fn rank(&self, index: &KnowledgeIndex, query_vector: &[f32], limit: usize) -> Vec<ScoredChunk> {
        let mut scored = index
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query_vector, &entry.embedding),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(limit);
        scored
    }

    pub async fn retrieve(
        &self,
        index: &KnowledgeIndex,
        raw_query: &str,
        embedder: &dyn Embedder,
    ) -> Result<Retrieval, ProviderError> {
        let normalized = self.normalize_query(raw_query);

        if let Some(found) = self.exact_match(index, &normalized) {
            return Ok(Retrieval::Exact(found));
        }

        if index.is_empty() {
            return Ok(Retrieval::Empty);
        }

        let query_vector = embedder.embed(&normalized).await?;
        Ok(Retrieval::Ranked(self.rank(index, &query_vector, self.top_k)))
    }
}
