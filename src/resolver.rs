//! Conflict resolution between mined candidates and the term store.
//!
//! The store's uniqueness constraint on `(source, source_lang, target_lang)`
//! is the source of truth. The resolver never locks and never overwrites:
//! a diverging translation comes back as a [`Resolution::Conflict`] for
//! external adjudication.
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::{CandidateTerm, StoreError, TermStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The same source already maps to the same target.
    Duplicate,
    /// A concurrent insert won between lookup and insert.
    DuplicateRace,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Inserted {
        id: i64,
    },
    Skipped {
        reason: SkipReason,
    },
    Conflict {
        existing_target: String,
        proposed_target: String,
        suggestion: String,
    },
}

impl Resolution {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

/// Decide what to do with one candidate and apply it.
pub fn resolve<S: TermStore + ?Sized>(
    candidate: &CandidateTerm,
    store: &S,
) -> Result<Resolution, StoreError> {
    let candidate = candidate.clone().normalized();
    let key = candidate.key();

    if let Some(existing) = store.find_term(&key)? {
        if existing.target == candidate.target {
            debug!("Skipping duplicate term {:?} ({})", key.source, key.pair());
            return Ok(Resolution::Skipped {
                reason: SkipReason::Duplicate,
            });
        }

        warn!(
            "Conflict on {:?} ({}): stored {:?}, proposed {:?}",
            key.source,
            key.pair(),
            existing.target,
            candidate.target
        );
        return Ok(Resolution::Conflict {
            suggestion: format!(
                "'{}' is already translated as '{}' ({}, {}); review whether '{}' should replace it",
                key.source,
                existing.target,
                existing.domain,
                existing.verification_status,
                candidate.target
            ),
            existing_target: existing.target,
            proposed_target: candidate.target,
        });
    }

    match store.insert_term(&candidate) {
        Ok(id) => Ok(Resolution::Inserted { id }),
        Err(StoreError::UniqueViolation(detail)) => {
            debug!("Lost insert race for {:?}: {detail}", key.source);
            Ok(Resolution::Skipped {
                reason: SkipReason::DuplicateRace,
            })
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTerm {
    pub source: String,
    pub target: String,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedTerm {
    pub source: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermConflict {
    pub source: String,
    pub existing_target: String,
    pub proposed_target: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTerm {
    pub source: String,
    pub error: String,
}

/// Aggregated outcome of [`resolve_bulk`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkResolution {
    pub inserted: Vec<ResolvedTerm>,
    pub skipped: Vec<SkippedTerm>,
    pub conflicts: Vec<TermConflict>,
    pub failed: Vec<FailedTerm>,
}

/// Resolve every candidate in order. A store error on one candidate is
/// recorded in `failed` and the rest of the batch still runs.
pub fn resolve_bulk<S: TermStore + ?Sized>(
    candidates: &[CandidateTerm],
    store: &S,
) -> BulkResolution {
    let mut result = BulkResolution::default();

    for candidate in candidates {
        let source = candidate.source.trim().to_string();
        match resolve(candidate, store) {
            Ok(Resolution::Inserted { id }) => result.inserted.push(ResolvedTerm {
                source,
                target: candidate.target.trim().to_string(),
                id,
            }),
            Ok(Resolution::Skipped { reason }) => {
                result.skipped.push(SkippedTerm { source, reason })
            }
            Ok(Resolution::Conflict {
                existing_target,
                proposed_target,
                suggestion,
            }) => result.conflicts.push(TermConflict {
                source,
                existing_target,
                proposed_target,
                suggestion,
            }),
            Err(e) => {
                warn!("Failed to resolve {source:?}: {e}");
                result.failed.push(FailedTerm {
                    source,
                    error: e.to_string(),
                });
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryTermStore;
    use crate::store::{LanguagePair, StoredTerm, TermKey, VerificationStatus, VerifiedSummary};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn candidate(source: &str, target: &str) -> CandidateTerm {
        CandidateTerm {
            source: source.to_string(),
            target: target.to_string(),
            source_lang: "en".to_string(),
            target_lang: "fr".to_string(),
            domain: "Packaging".to_string(),
            confidence_score: 0.85,
            context: "Put it in the box.".to_string(),
            origin_batch_id: "job-7-chunk-2".to_string(),
        }
    }

    #[test]
    fn test_insert_then_duplicate() {
        let store = MemoryTermStore::new();

        let first = resolve(&candidate("box", "boîte"), &store).unwrap();
        assert!(first.is_inserted());

        let second = resolve(&candidate("box", "boîte"), &store).unwrap();
        assert_eq!(
            second,
            Resolution::Skipped {
                reason: SkipReason::Duplicate
            }
        );
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_conflict_never_overwrites() {
        let store = MemoryTermStore::new();
        resolve(&candidate("box", "boîte"), &store).unwrap();

        let outcome = resolve(&candidate("box", "carton"), &store).unwrap();
        match outcome {
            Resolution::Conflict {
                existing_target,
                proposed_target,
                suggestion,
            } => {
                assert_eq!(existing_target, "boîte");
                assert_eq!(proposed_target, "carton");
                assert!(suggestion.contains("carton"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let stored = store
            .find_term(&TermKey::new("box", "en", "fr"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.target, "boîte");
    }

    #[test]
    fn test_lookup_normalizes_candidate() {
        let store = MemoryTermStore::new();
        resolve(&candidate("box", "boîte"), &store).unwrap();

        let mut shouting = candidate("  box ", "boîte ");
        shouting.source_lang = "EN".to_string();
        let outcome = resolve(&shouting, &store).unwrap();
        assert_eq!(
            outcome,
            Resolution::Skipped {
                reason: SkipReason::Duplicate
            }
        );
    }

    /// Reports "not found" on lookup, then loses the insert to another writer.
    struct RacingStore {
        raced: AtomicBool,
    }

    impl TermStore for RacingStore {
        fn find_term(&self, _key: &TermKey) -> Result<Option<StoredTerm>, StoreError> {
            Ok(None)
        }

        fn insert_term(&self, candidate: &CandidateTerm) -> Result<i64, StoreError> {
            self.raced.store(true, Ordering::SeqCst);
            Err(StoreError::UniqueViolation(candidate.source.clone()))
        }

        fn verified_summary(
            &self,
            _pair: &LanguagePair,
            _domains: &[&str],
        ) -> Result<VerifiedSummary, StoreError> {
            Ok(VerifiedSummary::default())
        }

        fn verified_terms(
            &self,
            _pair: &LanguagePair,
            _domains: &[&str],
        ) -> Result<Vec<StoredTerm>, StoreError> {
            Ok(Vec::new())
        }

        fn set_verification(
            &self,
            _key: &TermKey,
            _status: VerificationStatus,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[test]
    fn test_insert_race_is_skipped() {
        let store = RacingStore {
            raced: AtomicBool::new(false),
        };
        let outcome = resolve(&candidate("box", "boîte"), &store).unwrap();
        assert!(store.raced.load(Ordering::SeqCst));
        assert_eq!(
            outcome,
            Resolution::Skipped {
                reason: SkipReason::DuplicateRace
            }
        );
    }

    /// Fails lookups for one specific source.
    struct FlakyStore {
        inner: MemoryTermStore,
        broken: &'static str,
    }

    impl TermStore for FlakyStore {
        fn find_term(&self, key: &TermKey) -> Result<Option<StoredTerm>, StoreError> {
            if key.source == self.broken {
                return Err(StoreError::Corrupt("bad row".to_string()));
            }
            self.inner.find_term(key)
        }

        fn insert_term(&self, candidate: &CandidateTerm) -> Result<i64, StoreError> {
            self.inner.insert_term(candidate)
        }

        fn verified_summary(
            &self,
            pair: &LanguagePair,
            domains: &[&str],
        ) -> Result<VerifiedSummary, StoreError> {
            self.inner.verified_summary(pair, domains)
        }

        fn verified_terms(
            &self,
            pair: &LanguagePair,
            domains: &[&str],
        ) -> Result<Vec<StoredTerm>, StoreError> {
            self.inner.verified_terms(pair, domains)
        }

        fn set_verification(
            &self,
            key: &TermKey,
            status: VerificationStatus,
        ) -> Result<bool, StoreError> {
            self.inner.set_verification(key, status)
        }
    }

    #[test]
    fn test_bulk_aggregates_and_survives_failures() {
        let store = FlakyStore {
            inner: MemoryTermStore::new(),
            broken: "lid",
        };
        store.inner.insert_term(&candidate("tape", "ruban")).unwrap();

        let batch = vec![
            candidate("box", "boîte"),
            candidate("lid", "couvercle"),
            candidate("box", "boîte"),
            candidate("tape", "scotch"),
            candidate("label", "étiquette"),
        ];
        let result = resolve_bulk(&batch, &store);

        let inserted: Vec<&str> = result.inserted.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(inserted, vec!["box", "label"]);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].reason, SkipReason::Duplicate);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].existing_target, "ruban");
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].source, "lid");
    }
}
