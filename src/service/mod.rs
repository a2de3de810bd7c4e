/// Term extraction and translation capability.
///
/// The pipeline consumes an LLM-backed provider through this trait only;
/// the provider is responsible for bounding its own call latency.
pub mod mock;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while calling the extraction/translation provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("translation failed: {0}")]
    TranslationFailed(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// A term found in a chunk by the extraction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTerm {
    pub term: String,
    pub category: String,
    pub confidence: f64,
    pub evidence_sentence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermTranslation {
    pub target: String,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// Proper nouns and brand names that must stay untranslated.
    #[serde(default)]
    pub no_translate: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TranslationRequest<'a> {
    pub term: &'a str,
    pub source_lang: &'a str,
    pub target_lang: &'a str,
    pub domain: &'a str,
    pub context: &'a str,
}

/// Async extraction/translation provider.
///
/// Implementations must be `Send + Sync` so a mining job can run on a
/// spawned task while holding them behind `Arc`.
pub trait TermService: Send + Sync {
    fn extract_terms(
        &self,
        chunk_text: &str,
        source_lang: &str,
        domain: &str,
    ) -> impl Future<Output = Result<Vec<ExtractedTerm>, ServiceError>> + Send;

    fn translate_term(
        &self,
        request: TranslationRequest<'_>,
    ) -> impl Future<Output = Result<TermTranslation, ServiceError>> + Send;
}

/// Whether `term` actually occurs in `chunk_text`, ignoring case.
///
/// Providers occasionally return terms that are not in the input at all;
/// those are dropped before any translation call is spent on them.
pub fn has_evidence(chunk_text: &str, term: &str) -> bool {
    let term = term.trim();
    !term.is_empty() && chunk_text.to_lowercase().contains(&term.to_lowercase())
}
