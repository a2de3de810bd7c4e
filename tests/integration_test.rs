/// End-to-end integration tests for the termmine pipeline.
///
/// Tests the complete flow:
///   Config → Chunker → SQLite → Mining → Verification → Glossary cache
use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use termmine::chunker::{self, Chunker, Page};
use termmine::config::Config;
use termmine::db::Db;
use termmine::glossary::{ArtifactStore, FsArtifactStore, GlossaryCache};
use termmine::mining::{JobState, MiningParams, MiningProcessor};
use termmine::service::mock::MockTermService;
use termmine::store::{ChunkRepository, LanguagePair, TermKey, TermStore, VerificationStatus};
use termmine::variation::{TermPair, parse_tsv};
use tokio_util::sync::CancellationToken;

fn manual_pages() -> Vec<Page> {
    vec![
        Page::new(1, "Cutting room guide.\n\nLay the fabric flat before marking each pattern piece."),
        Page::new(
            2,
            "Sewing.\n\nJoin the pieces along the seam. Press every seam open.\n\nFinish the hem with a double fold.",
        ),
        Page::new(3, "Quality check.\n\nInspect each buttonhole and the hem before packing into a box."),
    ]
}

fn vocabulary() -> MockTermService {
    MockTermService::new([
        ("fabric", "ក្រណាត់"),
        ("seam", "ថ្នេរ"),
        ("hem", "ជាយ"),
        ("buttonhole", "រន្ធឡេវ"),
        ("box", "ប្រអប់"),
    ])
}

/// Full pipeline: chunk → persist → mine → verify → build glossary → invalidate
#[tokio::test(start_paused = true)]
async fn test_full_pipeline() {
    let temp_dir = tempdir().unwrap();
    let mut config = Config::default();
    config.db_path = temp_dir.path().join("terms.db").display().to_string();
    config.artifact_dir = temp_dir.path().join("glossaries").display().to_string();
    config.chunker.max_tokens = 20;
    assert!(config.validate().is_ok());

    // 1. Chunk
    let chunks = Chunker::new(config.chunker.clone())
        .unwrap()
        .chunk(&manual_pages());
    assert!(chunks.len() >= 3, "Each page should need its own chunk");
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert!(chunk.token_estimate <= 20, "chunk {i} over budget");
    }
    let estimate = chunker::estimate(&chunks, &config.rate_limit);
    assert_eq!(estimate.total_chunks, chunks.len());
    assert_eq!(estimate.delay_between_chunks_ms, 3000);

    // 2. Persist chunk records
    let db = Arc::new(Db::open(&config.db_path).unwrap());
    db.save_chunks("manual-1", &chunks).unwrap();

    // 3. Mine
    let service = Arc::new(vocabulary());
    let processor = MiningProcessor::new(
        service.clone(),
        db.clone(),
        db.clone(),
        config.mining.clone(),
        config.rate_limit.clone(),
    );
    let params = MiningParams::new("en", "km", "Garment");
    let result = processor
        .process_job("manual-1", &params, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.state, JobState::Completed);
    assert_eq!(result.processed_chunks, chunks.len());
    assert_eq!(result.terms_extracted, 5, "Each vocabulary term inserted once");
    assert!(result.errors.is_empty());
    assert!(result.conflicts.is_empty());

    let records = db.chunk_records("manual-1").unwrap();
    assert!(records.iter().all(|r| r.error.is_none()));
    let inserted: usize = records.iter().map(|r| r.terms_extracted).sum();
    assert_eq!(inserted, 5);

    // 4. Nothing verified yet → nothing to serve
    let pair = LanguagePair::new("en", "km");
    let artifacts = FsArtifactStore::new(&config.artifact_dir).unwrap();
    let cache = GlossaryCache::new(config.cache.clone());
    assert!(
        cache
            .get_or_build(&pair, "Garment", db.as_ref(), &artifacts)
            .unwrap()
            .is_none()
    );

    // 5. Verify two terms and build
    for source in ["hem", "box"] {
        assert!(
            db.set_verification(&TermKey::new(source, "en", "km"), VerificationStatus::Verified)
                .unwrap()
        );
    }
    let built = cache
        .get_or_build(&pair, "Garment", db.as_ref(), &artifacts)
        .unwrap()
        .unwrap();
    assert!(!built.cached);
    assert_eq!(built.term_count, 2);
    assert!(artifacts.path_of(&built.location).unwrap().is_file());

    let rows = parse_tsv(&artifacts.read(&built.location).unwrap()).unwrap();
    assert!(rows.contains(&TermPair::new("boxes", "ប្រអប់")));
    assert!(rows.contains(&TermPair::new("HEMS", "ជាយ")));

    // 6. Second request is served from the cache
    let again = cache
        .get_or_build(&pair, "Garment", db.as_ref(), &artifacts)
        .unwrap()
        .unwrap();
    assert!(again.cached);
    assert_eq!(again.location, built.location);

    // 7. A term mutation invalidates the pair
    db.set_verification(&TermKey::new("seam", "en", "km"), VerificationStatus::Verified)
        .unwrap();
    assert_eq!(cache.invalidate(&pair).unwrap(), 1);
    let rebuilt = cache
        .get_or_build(&pair, "Garment", db.as_ref(), &artifacts)
        .unwrap()
        .unwrap();
    assert!(!rebuilt.cached);
    assert_eq!(rebuilt.term_count, 3);
    assert_ne!(rebuilt.location, built.location);

    // 8. Re-running a finished job does not call the provider again
    let calls = service.extract_calls();
    let rerun = processor
        .process_job("manual-1", &params, None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rerun.processed_chunks, chunks.len());
    assert_eq!(rerun.terms_extracted, 0);
    assert_eq!(service.extract_calls(), calls);
}

/// Conflicting translations across two jobs never overwrite the store
#[tokio::test(start_paused = true)]
async fn test_conflict_across_jobs() {
    let db = Arc::new(Db::open_in_memory().unwrap());
    let chunks = chunker::chunk_pages(&[Page::new(1, "Fold the hem twice.")], 100, true).unwrap();
    db.save_chunks("a", &chunks).unwrap();
    db.save_chunks("b", &chunks).unwrap();
    let params = MiningParams::new("en", "km", "Garment");
    let config = Config::default();

    let first = MiningProcessor::new(
        Arc::new(MockTermService::new([("hem", "ជាយ")])),
        db.clone(),
        db.clone(),
        config.mining.clone(),
        config.rate_limit.clone(),
    );
    first
        .process_job("a", &params, None, CancellationToken::new())
        .await
        .unwrap();

    let second = MiningProcessor::new(
        Arc::new(MockTermService::new([("hem", "ព្រំ")])),
        db.clone(),
        db.clone(),
        config.mining.clone(),
        config.rate_limit.clone(),
    );
    let result = second
        .process_job("b", &params, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.terms_extracted, 0);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].existing_target, "ជាយ");
    let stored = db
        .find_term(&TermKey::new("hem", "en", "km"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.target, "ជាយ");
}

/// Test config defaults and validation
#[test]
fn test_config_defaults_and_validation() {
    let config = Config::default();

    assert_eq!(config.chunker.max_tokens, 1800);
    assert_eq!(config.chunker.chars_per_token, 4);
    assert_eq!(config.rate_limit.tpm_limit, 19_000);
    assert_eq!(config.cache.max_age_hours, 48);
    assert!(config.validate().is_ok());

    let mut bad_config = Config::default();
    bad_config.rate_limit.min_delay_ms = 90_000;
    assert!(bad_config.validate().is_err());
}

/// Test config file round trip
#[test]
fn test_config_save_and_load() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("termmine.json");
    let path = path.to_str().unwrap();

    let mut config = Config::default();
    config.chunker.max_tokens = 900;
    config.cache.generic_domain = "Common".to_string();
    config.save(path).unwrap();

    let loaded = Config::load(path).unwrap();
    assert_eq!(loaded.chunker.max_tokens, 900);
    assert_eq!(loaded.cache.generic_domain, "Common");
    assert!(fs::read_to_string(path).unwrap().contains("\"tpm_limit\""));
}
