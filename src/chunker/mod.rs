//! Token-aware chunking of extracted page text.
//!
//! Pages are packed greedily into chunks whose character count stays within
//! `max_tokens * chars_per_token`. A page that alone exceeds the budget is
//! fragmented by paragraph and then by sentence; fragments keep flowing into
//! the same accumulator so chunks stay as full as possible.
pub mod segment;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ChunkerConfig, RateLimitConfig};
use crate::mining::rate::RatePlan;
use segment::{PunctuationSegmenter, Segmenter};

/// Joins whole pages and paragraphs inside a chunk.
pub const PAGE_SEPARATOR: &str = "\n\n";
/// Joins consecutive sentences of a fragmented paragraph.
pub const SENTENCE_SEPARATOR: &str = " ";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("invalid chunker config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown chunk status: {other}")),
        }
    }
}

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
}

impl Page {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// A token-bounded slice of document text submitted as one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub char_count: usize,
    pub token_estimate: usize,
    pub page_range: BTreeSet<u32>,
    pub start_page: u32,
    pub end_page: u32,
    pub status: ChunkStatus,
}

/// Aggregate planning numbers for a chunk list under the configured TPM ceiling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingEstimate {
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub chunks_per_minute: u64,
    pub estimated_minutes: u64,
    pub delay_between_chunks_ms: u64,
}

/// Splits pages into ordered, non-overlapping (by default) chunks.
pub struct Chunker {
    config: ChunkerConfig,
    segmenter: Box<dyn Segmenter>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        if config.max_tokens == 0 {
            return Err(ChunkerError::InvalidConfig(
                "max_tokens must be positive".to_string(),
            ));
        }
        if config.chars_per_token == 0 {
            return Err(ChunkerError::InvalidConfig(
                "chars_per_token must be positive".to_string(),
            ));
        }
        if config.overlap_tokens >= config.max_tokens {
            return Err(ChunkerError::InvalidConfig(
                "overlap_tokens must be smaller than max_tokens".to_string(),
            ));
        }
        Ok(Self {
            config,
            segmenter: Box::new(PunctuationSegmenter),
        })
    }

    /// Replace the default punctuation-based sentence segmenter.
    #[must_use]
    pub fn with_segmenter(mut self, segmenter: impl Segmenter + 'static) -> Self {
        self.segmenter = Box::new(segmenter);
        self
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk pages in input order. Empty pages are skipped.
    pub fn chunk(&self, pages: &[Page]) -> Vec<Chunk> {
        let budget = self.config.char_budget();
        let mut builder = ChunkBuilder::new(
            budget,
            self.config.chars_per_token,
            self.config.overlap_tokens * self.config.chars_per_token,
        );

        for page in pages {
            let text = page.text.trim();
            if text.is_empty() {
                continue;
            }

            if char_len(text) > budget {
                debug!(
                    "Page {} exceeds budget ({} > {budget} chars), fragmenting",
                    page.page_number,
                    char_len(text)
                );
                builder.flush();
                self.add_oversized(&mut builder, text, page.page_number);
            } else {
                builder.add(text, PAGE_SEPARATOR, page.page_number);
            }
        }
        builder.flush();

        let chunks = builder.chunks;
        info!(
            "Chunked {} pages into {} chunks (budget {} tokens)",
            pages.len(),
            chunks.len(),
            self.config.max_tokens
        );
        chunks
    }

    fn add_oversized(&self, builder: &mut ChunkBuilder, text: &str, page: u32) {
        if !self.config.preserve_paragraphs {
            self.add_sentences(builder, text, page);
            return;
        }

        for para in segment::paragraphs(text) {
            if char_len(para) <= builder.budget {
                builder.add(para, PAGE_SEPARATOR, page);
            } else {
                self.add_sentences(builder, para, page);
            }
        }
    }

    fn add_sentences(&self, builder: &mut ChunkBuilder, text: &str, page: u32) {
        let mut joiner = PAGE_SEPARATOR;
        for sentence in self.segmenter.sentences(text) {
            builder.add(sentence, joiner, page);
            joiner = SENTENCE_SEPARATOR;
        }
    }
}

/// Chunk pages with the default segmentation and no overlap.
pub fn chunk_pages(
    pages: &[Page],
    max_tokens: usize,
    preserve_paragraphs: bool,
) -> Result<Vec<Chunk>, ChunkerError> {
    let config = ChunkerConfig {
        max_tokens,
        preserve_paragraphs,
        ..ChunkerConfig::default()
    };
    Ok(Chunker::new(config)?.chunk(pages))
}

/// Plan the processing time of `chunks` under `rate`.
pub fn estimate(chunks: &[Chunk], rate: &RateLimitConfig) -> ProcessingEstimate {
    let total_tokens: usize = chunks.iter().map(|c| c.token_estimate).sum();
    let plan = RatePlan::compute(total_tokens, chunks.len(), rate);
    let delay_ms = plan.delay.as_millis() as u64;

    ProcessingEstimate {
        total_chunks: chunks.len(),
        total_tokens,
        chunks_per_minute: plan.chunks_per_minute,
        estimated_minutes: (chunks.len() as u64 * delay_ms).div_ceil(60_000),
        delay_between_chunks_ms: delay_ms,
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ── Accumulator ──────────────────────────────────────────────────────

struct ChunkBuilder {
    budget: usize,
    chars_per_token: usize,
    overlap_chars: usize,
    text: String,
    chars: usize,
    /// Chars at the head of `text` carried over from the previous chunk.
    seeded: usize,
    pages: BTreeSet<u32>,
    chunks: Vec<Chunk>,
}

impl ChunkBuilder {
    fn new(budget: usize, chars_per_token: usize, overlap_chars: usize) -> Self {
        Self {
            budget,
            chars_per_token,
            overlap_chars,
            text: String::new(),
            chars: 0,
            seeded: 0,
            pages: BTreeSet::new(),
            chunks: Vec::new(),
        }
    }

    fn has_body(&self) -> bool {
        self.chars > self.seeded
    }

    fn fits(&self, len: usize, joiner: &str) -> bool {
        let sep = if self.text.is_empty() { 0 } else { joiner.len() };
        self.chars + sep + len <= self.budget
    }

    /// Append a fragment, flushing first if it would overflow. A fragment
    /// larger than the whole budget still gets a chunk of its own.
    fn add(&mut self, fragment: &str, joiner: &str, page: u32) {
        let len = char_len(fragment);
        if !self.fits(len, joiner) {
            self.flush();
            if !self.fits(len, joiner) {
                self.clear();
            }
        }

        if !self.text.is_empty() {
            self.text.push_str(joiner);
            self.chars += joiner.chars().count();
        }
        self.text.push_str(fragment);
        self.chars += len;
        self.pages.insert(page);
    }

    fn flush(&mut self) {
        if !self.has_body() {
            return;
        }

        let start_page = self.pages.first().copied().unwrap_or_default();
        let end_page = self.pages.last().copied().unwrap_or_default();
        let text = std::mem::take(&mut self.text);
        let chunk = Chunk {
            index: self.chunks.len(),
            char_count: self.chars,
            token_estimate: self.chars.div_ceil(self.chars_per_token),
            page_range: std::mem::take(&mut self.pages),
            start_page,
            end_page,
            status: ChunkStatus::Pending,
            text,
        };
        self.clear();

        if self.overlap_chars > 0 {
            let tail = overlap_tail(&chunk.text, self.overlap_chars);
            if !tail.is_empty() {
                self.text.push_str(tail);
                self.chars = char_len(tail);
                self.seeded = self.chars;
                self.pages.insert(end_page);
            }
        }

        self.chunks.push(chunk);
    }

    fn clear(&mut self) {
        self.text.clear();
        self.chars = 0;
        self.seeded = 0;
        self.pages.clear();
    }
}

/// The last `max_chars` chars of `text`, starting at a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    let total = char_len(text);
    if total <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn reconstruct(chunks: &[Chunk]) -> String {
        chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(SENTENCE_SEPARATOR)
    }

    fn pages_text(pages: &[Page]) -> String {
        pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(SENTENCE_SEPARATOR)
    }

    #[test]
    fn test_small_pages_share_a_chunk() {
        let pages = vec![Page::new(1, "Alpha page."), Page::new(2, "Beta page.")];
        let chunks = chunk_pages(&pages, 100, true).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Alpha page.\n\nBeta page.");
        assert_eq!(chunks[0].char_count, 23);
        assert_eq!(chunks[0].token_estimate, 6);
        assert_eq!(chunks[0].start_page, 1);
        assert_eq!(chunks[0].end_page, 2);
        assert_eq!(chunks[0].page_range, BTreeSet::from([1, 2]));
        assert_eq!(chunks[0].status, ChunkStatus::Pending);
    }

    #[test]
    fn test_page_that_does_not_fit_starts_new_chunk() {
        let pages = vec![
            Page::new(1, "a".repeat(300)),
            Page::new(2, "b".repeat(300)),
            Page::new(3, "c".repeat(50)),
        ];
        let chunks = chunk_pages(&pages, 100, true).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page_range, BTreeSet::from([1]));
        assert_eq!(chunks[1].page_range, BTreeSet::from([2, 3]));
        assert_eq!(chunks[1].char_count, 352);
    }

    #[test]
    fn test_oversized_page_scenario() {
        let pages = vec![Page::new(1, "A".repeat(50)), Page::new(2, "B".repeat(3000))];
        // A single 3000-char run has no sentence boundary; make page 2 splittable
        let sentences = "Bbbbbbbbb bbbbbbbbb bbbbbbbbb bbbbbbbbb. ".repeat(75);
        let pages = vec![pages[0].clone(), Page::new(2, sentences.trim().to_string())];

        let chunks = chunk_pages(&pages, 100, true).unwrap();

        assert!(chunks.len() > 2, "page 2 must be fragmented");
        assert_eq!(chunks[0].start_page, 1);
        assert!(chunks[0].text.starts_with(&"A".repeat(50)));
        for chunk in &chunks {
            assert!(
                chunk.token_estimate <= 100,
                "chunk {} has {} tokens",
                chunk.index,
                chunk.token_estimate
            );
        }
        assert!(chunks[1..].iter().all(|c| c.page_range == BTreeSet::from([2])));
    }

    #[test]
    fn test_unsplittable_sentence_is_emitted() {
        let pages = vec![Page::new(1, "A".repeat(50)), Page::new(2, "B".repeat(3000))];
        let chunks = chunk_pages(&pages, 100, true).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "A".repeat(50));
        assert_eq!(chunks[1].char_count, 3000);
        assert_eq!(chunks[1].token_estimate, 750);
    }

    #[test]
    fn test_indices_contiguous_and_pages_ordered() {
        let pages: Vec<Page> = (1..=20)
            .map(|n| Page::new(n, format!("Page {n} text. ").repeat(40)))
            .collect();
        let chunks = chunk_pages(&pages, 200, true).unwrap();

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.start_page <= chunk.end_page);
        }
        for pair in chunks.windows(2) {
            assert!(pair[0].end_page <= pair[1].start_page);
        }
    }

    #[test]
    fn test_reconstruction() {
        let pages = vec![
            Page::new(1, "Intro paragraph.\n\nSecond paragraph here."),
            Page::new(2, "Long sentence number one. ".repeat(60)),
            Page::new(3, ""),
            Page::new(4, "Closing words.\n\nThe end."),
        ];
        let chunks = chunk_pages(&pages, 80, true).unwrap();

        assert_eq!(normalized(&reconstruct(&chunks)), normalized(&pages_text(&pages)));
    }

    #[test]
    fn test_token_bound_without_paragraph_preservation() {
        let text = "Para one sentence. Another one!\n\nPara two? Yes. ".repeat(30);
        let pages = vec![Page::new(1, text.clone())];
        let chunks = chunk_pages(&pages, 50, false).unwrap();

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.token_estimate <= 50));
        assert_eq!(normalized(&reconstruct(&chunks)), normalized(&text));
    }

    #[test]
    fn test_paragraph_fragments_fill_accumulator() {
        let para = "x".repeat(150);
        let text = vec![para.clone(); 4].join("\n\n");
        let pages = vec![Page::new(7, text)];
        let chunks = chunk_pages(&pages, 100, true).unwrap();

        // 150 + 2 + 150 = 302 <= 400, a third paragraph would overflow
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].char_count, 302);
        assert_eq!(chunks[1].char_count, 302);
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_pages(&[], 100, true).unwrap().is_empty());
        let blank = vec![Page::new(1, "   \n\n  ")];
        assert!(chunk_pages(&blank, 100, true).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config() {
        assert!(chunk_pages(&[], 0, true).is_err());
        let config = ChunkerConfig {
            max_tokens: 10,
            overlap_tokens: 10,
            ..ChunkerConfig::default()
        };
        assert!(Chunker::new(config).is_err());
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let config = ChunkerConfig {
            max_tokens: 25,
            overlap_tokens: 5,
            ..ChunkerConfig::default()
        };
        let chunker = Chunker::new(config).unwrap();
        let text = "alpha beta gamma delta. ".repeat(20);
        let chunks = chunker.chunk(&[Page::new(1, text)]);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail = overlap_tail(&pair[0].text, 20);
            assert!(pair[1].text.starts_with(tail), "chunk {} lacks overlap", pair[1].index);
        }
        assert!(chunks.iter().all(|c| c.token_estimate <= 25));
    }

    #[test]
    fn test_custom_segmenter() {
        struct DandaSegmenter;
        impl Segmenter for DandaSegmenter {
            fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
                text.split_inclusive('।')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            }
        }

        let text = "यह एक वाक्य है।".repeat(20);
        let chunker = Chunker::new(ChunkerConfig {
            max_tokens: 20,
            ..ChunkerConfig::default()
        })
        .unwrap()
        .with_segmenter(DandaSegmenter);
        let chunks = chunker.chunk(&[Page::new(1, text)]);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.token_estimate <= 20));
    }

    #[test]
    fn test_estimate_scenario() {
        let chunks: Vec<Chunk> = (0..10)
            .map(|index| Chunk {
                index,
                text: String::new(),
                char_count: 3600,
                token_estimate: 900,
                page_range: BTreeSet::from([index as u32 + 1]),
                start_page: index as u32 + 1,
                end_page: index as u32 + 1,
                status: ChunkStatus::Pending,
            })
            .collect();

        let est = estimate(&chunks, &RateLimitConfig::default());
        assert_eq!(est.total_chunks, 10);
        assert_eq!(est.total_tokens, 9000);
        assert_eq!(est.chunks_per_minute, 17);
        assert_eq!(est.delay_between_chunks_ms, 3530);
        assert_eq!(est.estimated_minutes, 1);
    }

    #[test]
    fn test_status_parse() {
        for status in [
            ChunkStatus::Pending,
            ChunkStatus::Processing,
            ChunkStatus::Completed,
            ChunkStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ChunkStatus>().unwrap(), status);
        }
        assert!("done".parse::<ChunkStatus>().is_err());
    }
}
