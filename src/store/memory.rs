/// In-memory stores for tests and dry runs.
///
/// Same contract as the SQLite store, including the uniqueness check on
/// `(source, source_lang, target_lang)`.
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use super::{
    CandidateTerm, ChunkRecord, ChunkRepository, ChunkUpdate, LanguagePair, StoreError,
    StoredTerm, TermKey, TermStore, VerificationStatus, VerifiedSummary,
};
use crate::chunker::Chunk;

#[derive(Default)]
pub struct MemoryTermStore {
    terms: RwLock<HashMap<TermKey, StoredTerm>>,
}

impl MemoryTermStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.terms.read().map_err(|_| StoreError::LockPoisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Insert a term that is already verified, as a reviewer would.
    pub fn insert_verified(&self, candidate: &CandidateTerm) -> Result<i64, StoreError> {
        let id = self.insert_term(candidate)?;
        self.set_verification(&candidate.key(), VerificationStatus::Verified)?;
        Ok(id)
    }

    fn matching(
        terms: &HashMap<TermKey, StoredTerm>,
        pair: &LanguagePair,
        domains: &[&str],
    ) -> Vec<StoredTerm> {
        terms
            .values()
            .filter(|t| {
                t.verification_status == VerificationStatus::Verified
                    && t.source_lang == pair.source_lang
                    && t.target_lang == pair.target_lang
                    && domains.contains(&t.domain.as_str())
            })
            .cloned()
            .collect()
    }
}

impl TermStore for MemoryTermStore {
    fn find_term(&self, key: &TermKey) -> Result<Option<StoredTerm>, StoreError> {
        let terms = self.terms.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(terms.get(key).cloned())
    }

    fn insert_term(&self, candidate: &CandidateTerm) -> Result<i64, StoreError> {
        let candidate = candidate.clone().normalized();
        let key = candidate.key();
        let mut terms = self.terms.write().map_err(|_| StoreError::LockPoisoned)?;
        if terms.contains_key(&key) {
            return Err(StoreError::UniqueViolation(format!(
                "{} ({})",
                key.source,
                key.pair()
            )));
        }

        let id = terms.len() as i64 + 1;
        let now = Utc::now();
        terms.insert(
            key,
            StoredTerm {
                id,
                source: candidate.source,
                target: candidate.target,
                source_lang: candidate.source_lang,
                target_lang: candidate.target_lang,
                domain: candidate.domain,
                confidence_score: candidate.confidence_score,
                verification_status: VerificationStatus::Unverified,
                origin_batch_id: Some(candidate.origin_batch_id),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    fn verified_summary(
        &self,
        pair: &LanguagePair,
        domains: &[&str],
    ) -> Result<VerifiedSummary, StoreError> {
        let terms = self.terms.read().map_err(|_| StoreError::LockPoisoned)?;
        let matching = Self::matching(&terms, pair, domains);
        Ok(VerifiedSummary {
            count: matching.len(),
            max_updated_at: matching.iter().map(|t| t.updated_at).max(),
        })
    }

    fn verified_terms(
        &self,
        pair: &LanguagePair,
        domains: &[&str],
    ) -> Result<Vec<StoredTerm>, StoreError> {
        let terms = self.terms.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut matching = Self::matching(&terms, pair, domains);
        matching.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(matching)
    }

    fn set_verification(
        &self,
        key: &TermKey,
        status: VerificationStatus,
    ) -> Result<bool, StoreError> {
        let mut terms = self.terms.write().map_err(|_| StoreError::LockPoisoned)?;
        match terms.get_mut(key) {
            Some(term) => {
                term.verification_status = status;
                term.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryChunkRepository {
    jobs: RwLock<HashMap<String, Vec<ChunkRecord>>>,
}

impl MemoryChunkRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkRepository for MemoryChunkRepository {
    fn save_chunks(&self, job_id: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        let records = chunks
            .iter()
            .map(|chunk| ChunkRecord {
                job_id: job_id.to_string(),
                chunk: chunk.clone(),
                terms_extracted: 0,
                processing_ms: 0,
                error: None,
            })
            .collect();
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        jobs.insert(job_id.to_string(), records);
        Ok(())
    }

    fn load_chunks(&self, job_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        let records = jobs
            .get(job_id)
            .ok_or_else(|| StoreError::NotFound(format!("chunks for job {job_id}")))?;
        let mut chunks: Vec<Chunk> = records.iter().map(|r| r.chunk.clone()).collect();
        chunks.sort_by_key(|c| c.index);
        Ok(chunks)
    }

    fn update_chunk(
        &self,
        job_id: &str,
        chunk_index: usize,
        update: &ChunkUpdate,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        let record = jobs
            .get_mut(job_id)
            .and_then(|records| records.iter_mut().find(|r| r.chunk.index == chunk_index))
            .ok_or_else(|| StoreError::NotFound(format!("chunk {job_id}/{chunk_index}")))?;
        record.apply(update);
        Ok(())
    }

    fn chunk_records(&self, job_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut records = jobs.get(job_id).cloned().unwrap_or_default();
        records.sort_by_key(|r| r.chunk.index);
        Ok(records)
    }
}
