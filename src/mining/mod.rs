//! Sequential mining of a job's chunks under a TPM ceiling.
//!
//! Chunks are processed strictly one at a time: extract terms, translate each
//! surviving term, resolve the candidates against the term store, record the
//! chunk outcome. Between chunks the processor sleeps for the job's rate-plan
//! delay; the sleep ends early on cancellation.
//!
//! A failing chunk is recorded as `failed` and the job moves on. Only errors
//! outside the per-chunk boundary (loading the chunk list, a malformed list,
//! chunk status writes) fail the job.
pub mod job;
pub mod rate;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunker::{Chunk, ChunkStatus};
use crate::config::{MiningConfig, RateLimitConfig};
use crate::resolver::{TermConflict, resolve_bulk};
use crate::service::{ServiceError, TermService, TranslationRequest, has_evidence};
use crate::store::{
    CandidateTerm, ChunkRepository, ChunkUpdate, DEFAULT_DOMAIN, StoreError, TermStore,
};
pub use job::{JobGuard, JobSlot};
use rate::RatePlan;

#[derive(Error, Debug)]
pub enum MiningError {
    #[error("a mining job is already running: {active_job_id}")]
    Busy { active_job_id: String },

    #[error("malformed chunk list: {0}")]
    MalformedChunks(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("mining task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Mining,
    Completed,
    Failed,
    Aborted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Mining => "mining",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Snapshot of the current (or last) job, as returned by the status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: Option<String>,
    pub state: JobState,
    pub processed_chunks: usize,
    pub total_chunks: usize,
    pub percent_complete: f64,
    pub terms_extracted: usize,
    pub failed_chunks: usize,
    pub is_complete: bool,
}

impl JobStatus {
    fn idle() -> Self {
        Self {
            job_id: None,
            state: JobState::Idle,
            processed_chunks: 0,
            total_chunks: 0,
            percent_complete: 0.0,
            terms_extracted: 0,
            failed_chunks: 0,
            is_complete: false,
        }
    }

    fn started(job_id: &str) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            state: JobState::Mining,
            ..Self::idle()
        }
    }
}

/// Pushed after every processed chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub job_id: String,
    pub processed_chunks: usize,
    pub total_chunks: usize,
    pub percent_complete: f64,
    pub terms_extracted: usize,
    pub chunk_index: usize,
    pub chunk_status: ChunkStatus,
    pub chunk_terms: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkError {
    pub chunk_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: String,
    /// `Completed` or `Aborted`.
    pub state: JobState,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    /// Terms inserted into the store.
    pub terms_extracted: usize,
    pub skipped_terms: usize,
    pub conflicts: Vec<TermConflict>,
    pub errors: Vec<ChunkError>,
    pub elapsed_ms: u64,
}

/// Languages and domain a job mines for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningParams {
    pub source_lang: String,
    pub target_lang: String,
    pub domain: String,
}

impl MiningParams {
    pub fn new(source_lang: &str, target_lang: &str, domain: &str) -> Self {
        let domain = domain.trim();
        Self {
            source_lang: source_lang.trim().to_lowercase(),
            target_lang: target_lang.trim().to_lowercase(),
            domain: if domain.is_empty() {
                DEFAULT_DOMAIN.to_string()
            } else {
                domain.to_string()
            },
        }
    }
}

/// A job started with [`MiningProcessor::start_mining`].
pub struct JobHandle {
    pub job_id: String,
    pub progress: mpsc::Receiver<Progress>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<JobResult, MiningError>>,
}

impl JobHandle {
    /// Ask the job to stop after the chunk in flight.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<JobResult, MiningError> {
        self.handle.await?
    }
}

/// Outcome of one chunk.
#[derive(Debug, Default)]
struct ChunkStats {
    inserted: usize,
    skipped: usize,
    conflicts: Vec<TermConflict>,
    term_errors: Vec<String>,
}

pub struct MiningProcessor<T, S, R> {
    service: Arc<T>,
    terms: Arc<S>,
    chunks: Arc<R>,
    mining: MiningConfig,
    rate: RateLimitConfig,
    slot: JobSlot,
    status: Arc<watch::Sender<JobStatus>>,
}

impl<T, S, R> Clone for MiningProcessor<T, S, R> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            terms: self.terms.clone(),
            chunks: self.chunks.clone(),
            mining: self.mining.clone(),
            rate: self.rate.clone(),
            slot: self.slot.clone(),
            status: self.status.clone(),
        }
    }
}

impl<T, S, R> MiningProcessor<T, S, R>
where
    T: TermService + 'static,
    S: TermStore + 'static,
    R: ChunkRepository + 'static,
{
    pub fn new(
        service: Arc<T>,
        terms: Arc<S>,
        chunks: Arc<R>,
        mining: MiningConfig,
        rate: RateLimitConfig,
    ) -> Self {
        let (status, _) = watch::channel(JobStatus::idle());
        Self {
            service,
            terms,
            chunks,
            mining,
            rate,
            slot: JobSlot::new(),
            status: Arc::new(status),
        }
    }

    /// Latest job status snapshot.
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    pub fn active_job(&self) -> Option<String> {
        self.slot.active_job()
    }

    /// Run a job to completion on the current task.
    ///
    /// Fails with [`MiningError::Busy`] without touching the running job if
    /// another job holds the slot.
    pub async fn process_job(
        &self,
        job_id: &str,
        params: &MiningParams,
        progress: Option<mpsc::Sender<Progress>>,
        cancel: CancellationToken,
    ) -> Result<JobResult, MiningError> {
        let (guard, terminal) = self.acquire(job_id)?;
        self.run_guarded(guard, terminal, params, progress, cancel)
            .await
    }

    /// Start a job on a background task and return immediately.
    pub fn start_mining(
        &self,
        job_id: &str,
        params: MiningParams,
    ) -> Result<JobHandle, MiningError> {
        let (guard, terminal) = self.acquire(job_id)?;
        let (tx, rx) = mpsc::channel(self.mining.progress_capacity.max(1));
        let cancel = CancellationToken::new();

        let this = self.clone();
        let token = cancel.clone();
        // The guards move into the task, so a task dropped unpolled still
        // frees the slot and leaves a terminal status
        let handle = tokio::spawn(async move {
            this.run_guarded(guard, terminal, &params, Some(tx), token)
                .await
        });

        Ok(JobHandle {
            job_id: job_id.to_string(),
            progress: rx,
            cancel,
            handle,
        })
    }

    fn acquire(&self, job_id: &str) -> Result<(JobGuard, TerminalState), MiningError> {
        let guard = self.slot.try_acquire(job_id)?;
        self.status.send_replace(JobStatus::started(job_id));
        Ok((guard, TerminalState::new(self.status.clone())))
    }

    async fn run_guarded(
        &self,
        guard: JobGuard,
        mut terminal: TerminalState,
        params: &MiningParams,
        progress: Option<mpsc::Sender<Progress>>,
        cancel: CancellationToken,
    ) -> Result<JobResult, MiningError> {
        let job_id = guard.job_id().to_string();

        let result = self.run(&job_id, params, progress, cancel).await;
        match &result {
            Ok(done) => {
                terminal.finish(done.state);
                info!(
                    "Job {job_id} {}: {}/{} chunks, {} terms, {} conflicts, {} errors in {}ms",
                    done.state,
                    done.processed_chunks,
                    done.total_chunks,
                    done.terms_extracted,
                    done.conflicts.len(),
                    done.errors.len(),
                    done.elapsed_ms
                );
            }
            Err(e) => {
                terminal.finish(JobState::Failed);
                error!("Job {job_id} failed: {e}");
            }
        }

        drop(guard);
        result
    }

    async fn run(
        &self,
        job_id: &str,
        params: &MiningParams,
        progress: Option<mpsc::Sender<Progress>>,
        cancel: CancellationToken,
    ) -> Result<JobResult, MiningError> {
        let started = Instant::now();
        let chunks = self.chunks.load_chunks(job_id)?;
        check_chunk_list(&chunks)?;

        let total_chunks = chunks.len();
        let pending: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| matches!(c.status, ChunkStatus::Pending | ChunkStatus::Processing))
            .collect();
        let mut processed = total_chunks - pending.len();
        let mut failed_chunks = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Failed)
            .count();

        let pending_tokens: usize = pending.iter().map(|c| c.token_estimate).sum();
        let plan = RatePlan::compute(pending_tokens, pending.len(), &self.rate);
        info!(
            "Job {job_id}: mining {} of {total_chunks} chunks ({:.0} tokens avg, {} chunks/min, {}ms delay)",
            pending.len(),
            plan.avg_tokens_per_chunk,
            plan.chunks_per_minute,
            plan.delay.as_millis()
        );

        let mut result = JobResult {
            job_id: job_id.to_string(),
            state: JobState::Completed,
            total_chunks,
            processed_chunks: processed,
            terms_extracted: 0,
            skipped_terms: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            elapsed_ms: 0,
        };
        self.publish(&result, failed_chunks);

        for (i, chunk) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                result.state = JobState::Aborted;
                break;
            }

            self.chunks
                .update_chunk(job_id, chunk.index, &ChunkUpdate::processing())?;
            let chunk_started = Instant::now();
            let outcome = self.mine_chunk(job_id, params, chunk).await;
            let elapsed_ms = chunk_started.elapsed().as_millis() as u64;

            let (status, chunk_terms) = match outcome {
                Ok(stats) => {
                    self.chunks.update_chunk(
                        job_id,
                        chunk.index,
                        &ChunkUpdate::completed(stats.inserted, elapsed_ms),
                    )?;
                    debug!(
                        "Chunk {} done: {} inserted, {} skipped, {} conflicts",
                        chunk.index,
                        stats.inserted,
                        stats.skipped,
                        stats.conflicts.len()
                    );
                    result.terms_extracted += stats.inserted;
                    result.skipped_terms += stats.skipped;
                    result.conflicts.extend(stats.conflicts);
                    result.errors.extend(stats.term_errors.into_iter().map(|message| {
                        ChunkError {
                            chunk_index: chunk.index,
                            message,
                        }
                    }));
                    (ChunkStatus::Completed, stats.inserted)
                }
                Err(e) => {
                    warn!("Chunk {} of job {job_id} failed: {e}", chunk.index);
                    self.chunks.update_chunk(
                        job_id,
                        chunk.index,
                        &ChunkUpdate::failed(e.to_string(), elapsed_ms),
                    )?;
                    result.errors.push(ChunkError {
                        chunk_index: chunk.index,
                        message: e.to_string(),
                    });
                    failed_chunks += 1;
                    (ChunkStatus::Failed, 0)
                }
            };

            processed += 1;
            result.processed_chunks = processed;
            self.publish(&result, failed_chunks);
            if let Some(tx) = &progress {
                report(
                    tx,
                    Progress {
                        job_id: job_id.to_string(),
                        processed_chunks: processed,
                        total_chunks,
                        percent_complete: percent(processed, total_chunks),
                        terms_extracted: result.terms_extracted,
                        chunk_index: chunk.index,
                        chunk_status: status,
                        chunk_terms,
                    },
                );
            }

            if i + 1 < pending.len() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Job {job_id} cancelled during inter-chunk delay");
                        result.state = JobState::Aborted;
                        break;
                    }
                    _ = tokio::time::sleep(plan.delay) => {}
                }
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Extract, filter, translate, then resolve. Any provider error fails
    /// the whole chunk before anything is persisted.
    async fn mine_chunk(
        &self,
        job_id: &str,
        params: &MiningParams,
        chunk: &Chunk,
    ) -> Result<ChunkStats, ServiceError> {
        let extracted = self
            .service
            .extract_terms(&chunk.text, &params.source_lang, &params.domain)
            .await?;

        let mut seen = HashSet::new();
        let mut stats = ChunkStats::default();
        let mut candidates = Vec::new();

        for term in extracted {
            let source = term.term.trim();
            if source.is_empty() || !seen.insert(source.to_lowercase()) {
                continue;
            }
            if term.confidence < self.mining.min_confidence {
                debug!("Dropping {source:?}: confidence {:.2}", term.confidence);
                stats.skipped += 1;
                continue;
            }
            if self.mining.verify_evidence && !has_evidence(&chunk.text, source) {
                warn!(
                    "Dropping {source:?}: not found in chunk {} text",
                    chunk.index
                );
                stats.skipped += 1;
                continue;
            }

            let translation = self
                .service
                .translate_term(TranslationRequest {
                    term: source,
                    source_lang: &params.source_lang,
                    target_lang: &params.target_lang,
                    domain: &params.domain,
                    context: &term.evidence_sentence,
                })
                .await?;
            if translation.no_translate {
                debug!("Skipping {source:?}: marked as not-to-translate");
                stats.skipped += 1;
                continue;
            }

            candidates.push(CandidateTerm {
                source: source.to_string(),
                target: translation.target,
                source_lang: params.source_lang.clone(),
                target_lang: params.target_lang.clone(),
                domain: params.domain.clone(),
                confidence_score: (term.confidence + translation.confidence) / 2.0,
                context: term.evidence_sentence,
                origin_batch_id: format!("{job_id}-chunk-{}", chunk.index),
            });
        }

        let bulk = resolve_bulk(&candidates, self.terms.as_ref());
        stats.inserted = bulk.inserted.len();
        stats.skipped += bulk.skipped.len();
        stats.conflicts = bulk.conflicts;
        stats.term_errors = bulk
            .failed
            .into_iter()
            .map(|f| format!("{}: {}", f.source, f.error))
            .collect();
        Ok(stats)
    }

    fn publish(&self, result: &JobResult, failed_chunks: usize) {
        self.status.send_modify(|status| {
            status.processed_chunks = result.processed_chunks;
            status.total_chunks = result.total_chunks;
            status.percent_complete = percent(result.processed_chunks, result.total_chunks);
            status.terms_extracted = result.terms_extracted;
            status.failed_chunks = failed_chunks;
        });
    }
}

/// Sets a terminal state on the status channel, falling back to `Failed`
/// if dropped before [`TerminalState::finish`] (panic or dropped future).
struct TerminalState {
    status: Arc<watch::Sender<JobStatus>>,
    done: bool,
}

impl TerminalState {
    fn new(status: Arc<watch::Sender<JobStatus>>) -> Self {
        Self {
            status,
            done: false,
        }
    }

    fn finish(&mut self, state: JobState) {
        self.status.send_modify(|s| {
            s.state = state;
            s.is_complete = state.is_terminal();
        });
        self.done = true;
    }
}

impl Drop for TerminalState {
    fn drop(&mut self) {
        if !self.done {
            self.finish(JobState::Failed);
        }
    }
}

fn check_chunk_list(chunks: &[Chunk]) -> Result<(), MiningError> {
    let mut seen = HashSet::new();
    for chunk in chunks {
        if !seen.insert(chunk.index) {
            return Err(MiningError::MalformedChunks(format!(
                "duplicate chunk index {}",
                chunk.index
            )));
        }
    }
    Ok(())
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).round()
}

fn report(tx: &mpsc::Sender<Progress>, event: Progress) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(
                "Progress channel full, dropping update for chunk {}",
                event.chunk_index
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Progress receiver dropped");
        }
    }
}
