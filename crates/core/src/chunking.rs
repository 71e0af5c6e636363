use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{Chunk, ChunkingConfig};
use regex::Regex;

pub const CHARS_PER_TOKEN: usize = 4;

/// A sentence must end in whitespace or the end of the page. The word carrying a terminator
/// glued to the next character is never matched, so "3." in "Version 3.5" and "e." in
/// "e.g." are dropped.
const SENTENCE_PATTERN: &str = r"[^.!?]+[.!?]?(?:\s+|$)";

/// Token estimate used everywhere budgets are compared: one token per four characters.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits cleaned page texts into overlapping, sentence-aligned chunks.
///
/// Accumulation restarts on every page while chunk ids keep counting across the whole
/// document. Each chunk carries the number of the page it came from. Character offsets
/// are measured in chars against the pages joined with one separator each.
pub fn chunk_pages(pages: &[PageText], config: ChunkingConfig) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;
    let sentence_re = Regex::new(SENTENCE_PATTERN)?;
    let overlap_chars = config.overlap_tokens * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    let mut cursor = 0usize;
    let mut next_id = 0u64;

    for PageText { number, text: page_text } in pages {
        let page = *number;
        let page_chars = page_text.chars().count();

        if page_text.trim().is_empty() {
            cursor += page_chars + 1;
            continue;
        }

        let mut segments = sentence_re
            .find_iter(page_text)
            .map(|found| found.as_str())
            .collect::<Vec<_>>();
        if segments.is_empty() {
            segments.push(page_text.as_str());
        }

        let mut current = String::new();
        let mut current_start = cursor;

        for segment in segments {
            let segment_chars = segment.chars().count();
            let sentence = segment.trim();
            if sentence.is_empty() {
                cursor += segment_chars;
                continue;
            }

            if current.is_empty() {
                current_start = cursor;
            }

            let candidate = if current.is_empty() {
                sentence.to_string()
            } else {
                format!("{current} {sentence}")
            };

            if approx_tokens(&candidate) <= config.target_tokens {
                current = candidate;
            } else {
                if !current.is_empty() {
                    chunks.push(make_chunk(&mut next_id, &current, page, current_start));
                }

                let overlap = tail_chars(&current, overlap_chars);
                let overlap_len = overlap.chars().count();
                current = if overlap.is_empty() {
                    sentence.to_string()
                } else {
                    format!("{overlap} {sentence}").trim().to_string()
                };
                current_start = cursor.saturating_sub(overlap_len);
            }

            cursor += segment_chars;
        }

        if !current.trim().is_empty() {
            chunks.push(make_chunk(&mut next_id, current.trim(), page, current_start));
        }

        cursor += 1;
    }

    Ok(chunks)
}

fn make_chunk(next_id: &mut u64, text: &str, page: u32, start_char: usize) -> Chunk {
    let chunk = Chunk {
        id: Chunk::sequence_id(*next_id),
        text: text.to_string(),
        page,
        start_char,
        end_char: start_char + text.chars().count(),
    };
    *next_id += 1;
    chunk
}

fn tail_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }
    let total = text.chars().count();
    if total <= count {
        return text;
    }
    match text.char_indices().nth(total - count) {
        Some((offset, _)) => &text[offset..],
        None => "",
    }
}
