use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use termmine::chunker::{self, Chunker, Page};
use termmine::config::Config;
use termmine::db::Db;
use termmine::glossary::{FsArtifactStore, GlossaryCache};
use termmine::mining::{JobState, MiningParams, MiningProcessor};
use termmine::service::mock::MockTermService;
use termmine::store::{ChunkRepository, LanguagePair, TermKey, TermStore, VerificationStatus};
use termmine::variation::parse_tsv;

/// Form feed separates pages in plain-text input.
const PAGE_BREAK: char = '\x0c';

#[derive(Parser, Debug)]
#[command(
    name = "termmine",
    version,
    about = "Mine terminology from documents and build cached glossaries"
)]
struct Cli {
    /// Path to the JSON config file (defaults to ./termmine.json)
    #[arg(long, short, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a document into chunks and print the processing estimate
    Chunk {
        /// Plain-text file, pages separated by form feeds
        file: PathBuf,

        /// Override chunker.max_tokens
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Print chunks and estimate as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chunk a document and mine it for terms
    Mine {
        file: PathBuf,

        #[arg(long)]
        job: String,

        /// Two-column TSV of known terms used by the offline provider
        #[arg(long)]
        vocab: PathBuf,

        #[arg(long, default_value = "en")]
        source_lang: String,

        #[arg(long)]
        target_lang: String,

        #[arg(long, default_value = "General")]
        domain: String,

        /// Continue an existing job instead of re-chunking the file
        #[arg(long)]
        resume: bool,
    },

    /// Build (or reuse) the glossary artifact for a language pair
    Glossary {
        #[arg(long, default_value = "en")]
        source_lang: String,

        #[arg(long)]
        target_lang: String,

        #[arg(long, default_value = "General")]
        domain: String,
    },

    /// Mark a term verified (or unverified)
    Verify {
        source: String,

        #[arg(long, default_value = "en")]
        source_lang: String,

        #[arg(long)]
        target_lang: String,

        #[arg(long)]
        revoke: bool,
    },

    /// List stored terms of a language pair
    Terms {
        #[arg(long, default_value = "en")]
        source_lang: String,

        #[arg(long)]
        target_lang: String,

        /// Only terms with this status (verified / unverified)
        #[arg(long)]
        status: Option<VerificationStatus>,
    },

    /// Delete a stored term
    Remove {
        source: String,

        #[arg(long, default_value = "en")]
        source_lang: String,

        #[arg(long)]
        target_lang: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Command::Chunk {
            file,
            max_tokens,
            json,
        } => run_chunk(&config, &file, max_tokens, json),
        Command::Mine {
            file,
            job,
            vocab,
            source_lang,
            target_lang,
            domain,
            resume,
        } => {
            let params = MiningParams::new(&source_lang, &target_lang, &domain);
            run_mine(&config, &file, &job, &vocab, params, resume).await
        }
        Command::Glossary {
            source_lang,
            target_lang,
            domain,
        } => run_glossary(&config, &LanguagePair::new(&source_lang, &target_lang), &domain),
        Command::Verify {
            source,
            source_lang,
            target_lang,
            revoke,
        } => {
            let db = open_db(&config)?;
            let key = TermKey::new(&source, &source_lang, &target_lang);
            let status = if revoke {
                VerificationStatus::Unverified
            } else {
                VerificationStatus::Verified
            };
            anyhow::ensure!(
                db.set_verification(&key, status)?,
                "no term {:?} for {}",
                key.source,
                key.pair()
            );
            println!("{} ({}) is now {status}", key.source, key.pair());
            Ok(())
        }
        Command::Terms {
            source_lang,
            target_lang,
            status,
        } => {
            let db = open_db(&config)?;
            let pair = LanguagePair::new(&source_lang, &target_lang);
            for term in db.list_terms(&pair, status)? {
                println!(
                    "{}\t{}\t{}\t{}\t{:.2}",
                    term.source,
                    term.target,
                    term.domain,
                    term.verification_status,
                    term.confidence_score
                );
            }
            Ok(())
        }
        Command::Remove {
            source,
            source_lang,
            target_lang,
        } => {
            let db = open_db(&config)?;
            let key = TermKey::new(&source, &source_lang, &target_lang);
            anyhow::ensure!(
                db.delete_term(&key)?,
                "no term {:?} for {}",
                key.source,
                key.pair()
            );
            println!("Removed {} ({})", key.source, key.pair());
            Ok(())
        }
    }
}

fn open_db(config: &Config) -> Result<Db> {
    Db::open(&config.db_path).with_context(|| format!("Failed to open database {}", config.db_path))
}

fn read_pages(file: &Path) -> Result<Vec<Page>> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(text
        .split(PAGE_BREAK)
        .enumerate()
        .map(|(i, page)| Page::new(i as u32 + 1, page))
        .collect())
}

fn run_chunk(config: &Config, file: &Path, max_tokens: Option<usize>, json: bool) -> Result<()> {
    let mut chunker_config = config.chunker.clone();
    if let Some(max_tokens) = max_tokens {
        chunker_config.max_tokens = max_tokens;
    }
    let chunks = Chunker::new(chunker_config)?.chunk(&read_pages(file)?);
    let estimate = chunker::estimate(&chunks, &config.rate_limit);

    if json {
        let out = serde_json::json!({ "chunks": chunks, "estimate": estimate });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for chunk in &chunks {
        println!(
            "#{:<4} pages {}-{}  {} chars  ~{} tokens",
            chunk.index, chunk.start_page, chunk.end_page, chunk.char_count, chunk.token_estimate
        );
    }
    println!(
        "{} chunks, {} tokens, {} chunks/min, {}ms between chunks, ~{} min",
        estimate.total_chunks,
        estimate.total_tokens,
        estimate.chunks_per_minute,
        estimate.delay_between_chunks_ms,
        estimate.estimated_minutes
    );
    Ok(())
}

async fn run_mine(
    config: &Config,
    file: &Path,
    job_id: &str,
    vocab: &Path,
    params: MiningParams,
    resume: bool,
) -> Result<()> {
    let db = Arc::new(open_db(config)?);

    if !resume {
        let chunks = Chunker::new(config.chunker.clone())?.chunk(&read_pages(file)?);
        db.save_chunks(job_id, &chunks)?;
        let estimate = chunker::estimate(&chunks, &config.rate_limit);
        info!(
            "Job {job_id}: {} chunks, estimated {} min",
            estimate.total_chunks, estimate.estimated_minutes
        );
    }

    let vocab_bytes =
        std::fs::read(vocab).with_context(|| format!("Failed to read {}", vocab.display()))?;
    let service = MockTermService::new(
        parse_tsv(&vocab_bytes)?
            .into_iter()
            .map(|pair| (pair.source, pair.target)),
    );

    let total = db.load_chunks(job_id)?.len() as u64;
    let processor = MiningProcessor::new(
        Arc::new(service),
        db.clone(),
        db.clone(),
        config.mining.clone(),
        config.rate_limit.clone(),
    );
    let mut handle = processor.start_mining(job_id, params)?;

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} chunks {msg}")?
            .progress_chars("█▓░"),
    );

    loop {
        tokio::select! {
            event = handle.progress.recv() => match event {
                Some(p) => {
                    pb.set_position(p.processed_chunks as u64);
                    pb.set_message(format!("{} terms", p.terms_extracted));
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                pb.println("Cancelling after the current chunk...");
                handle.abort();
            }
        }
    }

    let result = handle.join().await?;
    pb.set_position(result.processed_chunks as u64);
    pb.finish_and_clear();

    println!(
        "Job {} {}: {}/{} chunks, {} new terms, {} skipped, {} conflicts",
        result.job_id,
        result.state,
        result.processed_chunks,
        result.total_chunks,
        result.terms_extracted,
        result.skipped_terms,
        result.conflicts.len()
    );
    for conflict in &result.conflicts {
        println!("  conflict: {}", conflict.suggestion);
    }
    for error in &result.errors {
        println!("  chunk {}: {}", error.chunk_index, error.message);
    }
    if result.state == JobState::Aborted {
        println!("Run again with --resume to finish the remaining chunks.");
    }
    Ok(())
}

fn run_glossary(config: &Config, pair: &LanguagePair, domain: &str) -> Result<()> {
    let db = open_db(config)?;
    let artifacts = FsArtifactStore::new(&config.artifact_dir)
        .with_context(|| format!("Failed to create {}", config.artifact_dir))?;
    let cache = GlossaryCache::new(config.cache.clone());

    match cache.get_or_build(pair, domain, &db, &artifacts)? {
        Some(artifact) => println!(
            "{} ({} terms, {} entries)",
            artifacts.path_of(&artifact.location)?.display(),
            artifact.term_count,
            artifact.entry_count
        ),
        None => println!("No verified terms for {pair}"),
    }
    Ok(())
}
