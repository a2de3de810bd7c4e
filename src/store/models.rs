use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunker::{Chunk, ChunkStatus};

pub const DEFAULT_DOMAIN: &str = "General";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Verified,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(Self::Unverified),
            "verified" => Ok(Self::Verified),
            other => Err(format!("unknown verification status: {other}")),
        }
    }
}

/// Source/target language codes, lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source_lang: String,
    pub target_lang: String,
}

impl LanguagePair {
    pub fn new(source_lang: &str, target_lang: &str) -> Self {
        Self {
            source_lang: normalize_lang(source_lang),
            target_lang: normalize_lang(target_lang),
        }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source_lang, self.target_lang)
    }
}

/// The store's uniqueness key: `(source, source_lang, target_lang)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermKey {
    pub source: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl TermKey {
    pub fn new(source: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            source: source.trim().to_string(),
            source_lang: normalize_lang(source_lang),
            target_lang: normalize_lang(target_lang),
        }
    }

    pub fn pair(&self) -> LanguagePair {
        LanguagePair {
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
        }
    }
}

/// A mined term on its way to the store. Never persisted without passing
/// through the conflict resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTerm {
    pub source: String,
    pub target: String,
    pub source_lang: String,
    pub target_lang: String,
    pub domain: String,
    pub confidence_score: f64,
    pub context: String,
    pub origin_batch_id: String,
}

impl CandidateTerm {
    pub fn key(&self) -> TermKey {
        TermKey::new(&self.source, &self.source_lang, &self.target_lang)
    }

    /// Trimmed text, lower-cased language codes, default domain, and a
    /// confidence clamped to `[0, 1]`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.source = self.source.trim().to_string();
        self.target = self.target.trim().to_string();
        self.source_lang = normalize_lang(&self.source_lang);
        self.target_lang = normalize_lang(&self.target_lang);
        if self.domain.trim().is_empty() {
            self.domain = DEFAULT_DOMAIN.to_string();
        }
        self.confidence_score = self.confidence_score.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTerm {
    pub id: i64,
    pub source: String,
    pub target: String,
    pub source_lang: String,
    pub target_lang: String,
    pub domain: String,
    pub confidence_score: f64,
    pub verification_status: VerificationStatus,
    pub origin_batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Verified-term state that feeds the glossary fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifiedSummary {
    pub count: usize,
    pub max_updated_at: Option<DateTime<Utc>>,
}

/// Outcome fields written back to a chunk record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpdate {
    pub status: ChunkStatus,
    pub terms_extracted: usize,
    pub processing_ms: u64,
    pub error: Option<String>,
}

impl ChunkUpdate {
    pub fn processing() -> Self {
        Self {
            status: ChunkStatus::Processing,
            terms_extracted: 0,
            processing_ms: 0,
            error: None,
        }
    }

    pub fn completed(terms_extracted: usize, processing_ms: u64) -> Self {
        Self {
            status: ChunkStatus::Completed,
            terms_extracted,
            processing_ms,
            error: None,
        }
    }

    pub fn failed(error: String, processing_ms: u64) -> Self {
        Self {
            status: ChunkStatus::Failed,
            terms_extracted: 0,
            processing_ms,
            error: Some(error),
        }
    }
}

/// A persisted chunk plus its processing outcome, keyed by `(job_id, chunk.index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub job_id: String,
    pub chunk: Chunk,
    pub terms_extracted: usize,
    pub processing_ms: u64,
    pub error: Option<String>,
}

impl ChunkRecord {
    pub fn apply(&mut self, update: &ChunkUpdate) {
        self.chunk.status = update.status;
        self.terms_extracted = update.terms_extracted;
        self.processing_ms = update.processing_ms;
        self.error = update.error.clone();
    }
}

pub fn normalize_lang(lang: &str) -> String {
    lang.trim().to_lowercase()
}
