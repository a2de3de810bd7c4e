/// Capabilities the pipeline consumes from its persistence layer.
///
/// `TermStore` is the source of truth for conflict detection; it must reject
/// a second insert of the same `(source, source_lang, target_lang)` key with
/// [`StoreError::UniqueViolation`]. `ChunkRepository` persists chunk records
/// keyed by `(job_id, chunk_index)`.
pub mod memory;
pub mod models;

use thiserror::Error;

use crate::chunker::Chunk;
pub use models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Lookup, insert and verified-term queries over the terminology store.
pub trait TermStore: Send + Sync {
    fn find_term(&self, key: &TermKey) -> Result<Option<StoredTerm>, StoreError>;

    /// Insert a new unverified term and return its id.
    fn insert_term(&self, candidate: &CandidateTerm) -> Result<i64, StoreError>;

    /// Count and latest `updated_at` of verified terms in any of `domains`.
    fn verified_summary(
        &self,
        pair: &LanguagePair,
        domains: &[&str],
    ) -> Result<VerifiedSummary, StoreError>;

    /// All verified terms of the pair in any of `domains`, ordered by source.
    fn verified_terms(
        &self,
        pair: &LanguagePair,
        domains: &[&str],
    ) -> Result<Vec<StoredTerm>, StoreError>;

    /// Change a term's verification status. Returns `false` if no term has `key`.
    fn set_verification(
        &self,
        key: &TermKey,
        status: VerificationStatus,
    ) -> Result<bool, StoreError>;
}

/// Chunk records for mining jobs.
pub trait ChunkRepository: Send + Sync {
    /// Replace all chunks of `job_id`.
    fn save_chunks(&self, job_id: &str, chunks: &[Chunk]) -> Result<(), StoreError>;

    /// Chunks of `job_id` in index order.
    fn load_chunks(&self, job_id: &str) -> Result<Vec<Chunk>, StoreError>;

    fn update_chunk(
        &self,
        job_id: &str,
        chunk_index: usize,
        update: &ChunkUpdate,
    ) -> Result<(), StoreError>;

    fn chunk_records(&self, job_id: &str) -> Result<Vec<ChunkRecord>, StoreError>;
}
