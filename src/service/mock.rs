/// Mock term service for tests and offline runs.
///
/// Extraction is a case-insensitive vocabulary scan over the chunk text and
/// translation is a vocabulary lookup, so results are fully deterministic.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ExtractedTerm, ServiceError, TermService, TermTranslation, TranslationRequest};
use crate::chunker::segment::{PunctuationSegmenter, Segmenter};

pub struct MockTermService {
    vocabulary: BTreeMap<String, String>,
    no_translate: BTreeSet<String>,
    fail_marker: Option<String>,
    latency: Duration,
    pub extraction_confidence: f64,
    pub translation_confidence: f64,
    extract_calls: AtomicUsize,
    translate_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTermService {
    /// Create a mock that knows the given `(source, target)` pairs.
    #[must_use]
    pub fn new<S, T>(vocabulary: impl IntoIterator<Item = (S, T)>) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            vocabulary: vocabulary
                .into_iter()
                .map(|(s, t)| (s.into().to_lowercase(), t.into()))
                .collect(),
            no_translate: BTreeSet::new(),
            fail_marker: None,
            latency: Duration::ZERO,
            extraction_confidence: 0.9,
            translation_confidence: 0.8,
            extract_calls: AtomicUsize::new(0),
            translate_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Extraction fails for any chunk containing `marker`.
    #[must_use]
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    /// Mark a term as a proper noun the translator must leave alone.
    #[must_use]
    pub fn keep_untranslated(mut self, term: impl Into<String>) -> Self {
        self.no_translate.insert(term.into().to_lowercase());
        self
    }

    /// Simulated provider latency per call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn translate_calls(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn evidence_for(text: &str, term: &str) -> String {
        PunctuationSegmenter
            .sentences(text)
            .into_iter()
            .find(|s| s.to_lowercase().contains(term))
            .unwrap_or(text)
            .trim()
            .to_string()
    }
}

impl Default for MockTermService {
    fn default() -> Self {
        Self::new(Vec::<(String, String)>::new())
    }
}

impl TermService for MockTermService {
    async fn extract_terms(
        &self,
        chunk_text: &str,
        _source_lang: &str,
        _domain: &str,
    ) -> Result<Vec<ExtractedTerm>, ServiceError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await;

        if let Some(marker) = &self.fail_marker {
            if chunk_text.contains(marker.as_str()) {
                return Err(ServiceError::ExtractionFailed(format!(
                    "provider rejected chunk containing {marker:?}"
                )));
            }
        }

        let lower = chunk_text.to_lowercase();
        Ok(self
            .vocabulary
            .keys()
            .filter(|term| lower.contains(term.as_str()))
            .map(|term| ExtractedTerm {
                term: term.clone(),
                category: "terminology".to_string(),
                confidence: self.extraction_confidence,
                evidence_sentence: Self::evidence_for(chunk_text, term),
            })
            .collect())
    }

    async fn translate_term(
        &self,
        request: TranslationRequest<'_>,
    ) -> Result<TermTranslation, ServiceError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await;

        let key = request.term.to_lowercase();
        let target = self.vocabulary.get(&key).ok_or_else(|| {
            ServiceError::TranslationFailed(format!(
                "no {} translation for {:?}",
                request.target_lang, request.term
            ))
        })?;

        Ok(TermTranslation {
            target: target.clone(),
            confidence: self.translation_confidence,
            alternatives: Vec::new(),
            no_translate: self.no_translate.contains(&key),
        })
    }
}
