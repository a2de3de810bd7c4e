//! Just-in-time glossary artifacts backed by a fingerprint cache.
//!
//! The fingerprint summarizes the verified-term state of a language pair and
//! domain. While it is unchanged and the artifact still exists, requests are
//! served from the in-process index without regenerating anything.
pub mod artifact;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::store::{LanguagePair, StoreError, TermStore, VerifiedSummary};
use crate::variation::{TermPair, expand_entries, render_tsv};
pub use artifact::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};

/// Length of the hex fingerprint embedded in artifact names.
const FINGERPRINT_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum GlossaryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("artifact store error: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("failed to render glossary: {0}")]
    Render(#[from] csv::Error),

    #[error("glossary cache lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub location: String,
    pub pair: LanguagePair,
    pub domain: String,
    pub term_count: usize,
    pub entry_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A servable glossary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlossaryArtifact {
    pub location: String,
    /// Verified terms the artifact was built from.
    pub term_count: usize,
    /// Rows after variation expansion.
    pub entry_count: usize,
    pub cached: bool,
}

impl From<&CacheEntry> for GlossaryArtifact {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            location: entry.location.clone(),
            term_count: entry.term_count,
            entry_count: entry.entry_count,
            cached: true,
        }
    }
}

pub struct GlossaryCache {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Invalidated entries whose artifacts the next sweep deletes.
    retired: Mutex<Vec<CacheEntry>>,
}

impl GlossaryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> Result<usize, GlossaryError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| GlossaryError::LockPoisoned)?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool, GlossaryError> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of the index, oldest first.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, GlossaryError> {
        let entries = self.entries.read().map_err(|_| GlossaryError::LockPoisoned)?;
        let mut list: Vec<CacheEntry> = entries.values().cloned().collect();
        list.sort_by_key(|e| e.created_at);
        Ok(list)
    }

    /// Return the glossary for `pair` and `domain`, building it if the
    /// verified-term state changed or the artifact disappeared.
    ///
    /// Verified terms of the generic domain are always included. Returns
    /// `None` when there are no verified terms to serve.
    pub fn get_or_build<S, A>(
        &self,
        pair: &LanguagePair,
        domain: &str,
        terms: &S,
        artifacts: &A,
    ) -> Result<Option<GlossaryArtifact>, GlossaryError>
    where
        S: TermStore + ?Sized,
        A: ArtifactStore + ?Sized,
    {
        let domain = self.domain_or_generic(domain);
        let domains = self.domains_for(&domain);
        let domains: Vec<&str> = domains.iter().map(String::as_str).collect();

        let summary = terms.verified_summary(pair, &domains)?;
        if summary.count == 0 {
            debug!("No verified terms for {pair} ({domain}), nothing to build");
            return Ok(None);
        }

        let fp = fingerprint(pair, &domain, &summary);

        let hit = {
            let entries = self.entries.read().map_err(|_| GlossaryError::LockPoisoned)?;
            entries.get(&fp).cloned()
        };
        if let Some(entry) = hit {
            if artifacts.exists(&entry.location)? {
                debug!("Glossary cache hit: {}", entry.location);
                return Ok(Some(GlossaryArtifact::from(&entry)));
            }
            warn!(
                "Cached glossary {} is gone from the artifact store, rebuilding",
                entry.location
            );
            self.entries
                .write()
                .map_err(|_| GlossaryError::LockPoisoned)?
                .remove(&fp);
        }

        let verified = terms.verified_terms(pair, &domains)?;
        let pairs: Vec<TermPair> = verified
            .iter()
            .map(|t| TermPair::new(t.source.as_str(), t.target.as_str()))
            .collect();
        let expanded = expand_entries(&pairs);
        let bytes = render_tsv(&expanded)?;

        let location = format!("{}.tsv", artifact_name(pair, &domain, &fp));
        artifacts.write(&location, &bytes)?;

        let entry = CacheEntry {
            fingerprint: fp.clone(),
            location,
            pair: pair.clone(),
            domain,
            term_count: verified.len(),
            entry_count: expanded.len(),
            created_at: Utc::now(),
        };
        info!(
            "Built glossary {} ({} terms, {} entries)",
            entry.location, entry.term_count, entry.entry_count
        );

        let artifact = GlossaryArtifact {
            cached: false,
            ..GlossaryArtifact::from(&entry)
        };
        self.entries
            .write()
            .map_err(|_| GlossaryError::LockPoisoned)?
            .insert(fp, entry);
        Ok(Some(artifact))
    }

    /// Drop every entry of `pair`, whatever the domain. Call after any term
    /// mutation in the pair. Their artifacts are deleted by the next sweep.
    pub fn invalidate(&self, pair: &LanguagePair) -> Result<usize, GlossaryError> {
        let removed: Vec<CacheEntry> = {
            let mut entries = self.entries.write().map_err(|_| GlossaryError::LockPoisoned)?;
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, e)| &e.pair == pair)
                .map(|(fp, _)| fp.clone())
                .collect();
            stale.iter().filter_map(|fp| entries.remove(fp)).collect()
        };

        let count = removed.len();
        if count > 0 {
            info!("Invalidated {count} glossary cache entries for {pair}");
            self.retired
                .lock()
                .map_err(|_| GlossaryError::LockPoisoned)?
                .extend(removed);
        }
        Ok(count)
    }

    /// Remove entries older than the configured maximum age.
    pub fn sweep<A: ArtifactStore + ?Sized>(
        &self,
        artifacts: &A,
    ) -> Result<Vec<CacheEntry>, GlossaryError> {
        self.sweep_older_than(self.config.max_age(), artifacts)
    }

    /// Remove entries at least `max_age` old and delete their artifacts,
    /// along with the artifacts of invalidated entries. Artifact deletion is
    /// best-effort. Returns every entry whose artifact was released.
    pub fn sweep_older_than<A: ArtifactStore + ?Sized>(
        &self,
        max_age: Duration,
        artifacts: &A,
    ) -> Result<Vec<CacheEntry>, GlossaryError> {
        let now = Utc::now();
        let (mut released, live): (Vec<CacheEntry>, HashSet<String>) = {
            let mut entries = self.entries.write().map_err(|_| GlossaryError::LockPoisoned)?;
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, e)| {
                    now.signed_duration_since(e.created_at)
                        .to_std()
                        .unwrap_or_default()
                        >= max_age
                })
                .map(|(fp, _)| fp.clone())
                .collect();
            let expired = stale.iter().filter_map(|fp| entries.remove(fp)).collect();
            let live = entries.values().map(|e| e.location.clone()).collect();
            (expired, live)
        };
        let expired = released.len();
        released.append(&mut *self.retired.lock().map_err(|_| GlossaryError::LockPoisoned)?);

        // A rebuild with an unchanged fingerprint reuses the retired location
        for entry in released.iter().filter(|e| !live.contains(&e.location)) {
            if let Err(e) = artifacts.delete(&entry.location) {
                warn!("Failed to delete swept artifact {}: {e}", entry.location);
            }
        }
        if !released.is_empty() {
            info!(
                "Swept {expired} expired and {} invalidated glossary cache entries",
                released.len() - expired
            );
        }
        Ok(released)
    }

    /// Run [`GlossaryCache::sweep`] every `sweep_interval` until `cancel` fires.
    pub fn spawn_sweeper<A>(
        self: Arc<Self>,
        artifacts: Arc<A>,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        A: ArtifactStore + ?Sized + 'static,
    {
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Glossary sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(artifacts.as_ref()) {
                            warn!("Glossary sweep failed: {e}");
                        }
                    }
                }
            }
        })
    }

    fn domain_or_generic(&self, domain: &str) -> String {
        let domain = domain.trim();
        if domain.is_empty() {
            self.config.generic_domain.clone()
        } else {
            domain.to_string()
        }
    }

    fn domains_for(&self, domain: &str) -> Vec<String> {
        if domain == self.config.generic_domain {
            vec![domain.to_string()]
        } else {
            vec![domain.to_string(), self.config.generic_domain.clone()]
        }
    }
}

/// Deterministic hash of the verified-term state of a pair and domain.
pub fn fingerprint(pair: &LanguagePair, domain: &str, summary: &VerifiedSummary) -> String {
    let max_updated = summary
        .max_updated_at
        .map(|t| t.timestamp_micros().to_string())
        .unwrap_or_default();

    let mut hasher = blake3::Hasher::new();
    for part in [
        pair.source_lang.as_str(),
        pair.target_lang.as_str(),
        domain,
        summary.count.to_string().as_str(),
        max_updated.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    let mut hex = hasher.finalize().to_hex().to_string();
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// `{source_lang}-{target_lang}-{domain}-{fingerprint}` with every part
/// reduced to a filename-safe slug.
pub fn artifact_name(pair: &LanguagePair, domain: &str, fingerprint: &str) -> String {
    format!(
        "{}-{}-{}-{fingerprint}",
        slug(&pair.source_lang, "-_"),
        slug(&pair.target_lang, "-_"),
        slug(domain, "")
    )
}

fn slug(part: &str, keep: &str) -> String {
    part.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || keep.contains(c) {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
