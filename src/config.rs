/// Configuration module for termmine.
///
/// Handles loading, validating, and providing default configuration values.
/// Every tunable constant of the pipeline (chars-per-token ratio, TPM ceiling,
/// safety margin, delay bounds, cache age) lives here so callers and tests can
/// override them at construction time.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./termmine.db".to_string()
}

fn default_artifact_dir() -> String {
    "./glossaries".to_string()
}

fn default_max_tokens() -> usize {
    1800
}

fn default_chars_per_token() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_tpm_limit() -> u64 {
    19_000
}

fn default_safety_margin() -> f64 {
    0.85
}

fn default_min_delay_ms() -> u64 {
    3_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_progress_capacity() -> usize {
    64
}

fn default_generic_domain() -> String {
    "General".to_string()
}

fn default_max_age_hours() -> u64 {
    48
}

fn default_sweep_interval_minutes() -> u64 {
    60
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,

    #[serde(default)]
    pub chunker: ChunkerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub mining: MiningConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChunkerConfig {
    /// Upper bound on a chunk's token estimate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Split oversized pages on blank lines before falling back to sentences.
    #[serde(default = "default_true")]
    pub preserve_paragraphs: bool,

    /// Tokens of trailing context repeated at the head of the next chunk.
    /// Zero for glossary mining so no term is extracted twice.
    #[serde(default)]
    pub overlap_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_tpm_limit")]
    pub tpm_limit: u64,

    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MiningConfig {
    /// Extracted terms below this confidence are not translated.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,

    /// Drop extracted terms that do not occur in the chunk text.
    #[serde(default = "default_true")]
    pub verify_evidence: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Domain whose verified terms are merged into every glossary.
    #[serde(default = "default_generic_domain")]
    pub generic_domain: String,

    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,

    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            artifact_dir: default_artifact_dir(),
            chunker: ChunkerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            mining: MiningConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            chars_per_token: default_chars_per_token(),
            preserve_paragraphs: default_true(),
            overlap_tokens: 0,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tpm_limit: default_tpm_limit(),
            safety_margin: default_safety_margin(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            progress_capacity: default_progress_capacity(),
            verify_evidence: default_true(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generic_domain: default_generic_domain(),
            max_age_hours: default_max_age_hours(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl ChunkerConfig {
    /// Character budget of a single chunk.
    #[must_use]
    pub fn char_budget(&self) -> usize {
        self.max_tokens * self.chars_per_token
    }
}

impl RateLimitConfig {
    /// Tokens per minute the pipeline actually plans against.
    #[must_use]
    pub fn safe_tokens_per_minute(&self) -> f64 {
        self.tpm_limit as f64 * self.safety_margin
    }
}

impl CacheConfig {
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 60 * 60)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes * 60)
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"termmine.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "termmine.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "termmine.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunker.max_tokens > 0, "chunker.max_tokens must be positive");
        anyhow::ensure!(
            self.chunker.chars_per_token > 0,
            "chunker.chars_per_token must be positive"
        );
        anyhow::ensure!(
            self.chunker.overlap_tokens < self.chunker.max_tokens,
            "chunker.overlap_tokens must be smaller than max_tokens"
        );
        anyhow::ensure!(self.rate_limit.tpm_limit > 0, "rate_limit.tpm_limit must be positive");
        anyhow::ensure!(
            self.rate_limit.safety_margin > 0.0 && self.rate_limit.safety_margin <= 1.0,
            "rate_limit.safety_margin must be in (0, 1]"
        );
        anyhow::ensure!(
            self.rate_limit.min_delay_ms <= self.rate_limit.max_delay_ms,
            "rate_limit.min_delay_ms must not exceed max_delay_ms"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.mining.min_confidence),
            "mining.min_confidence must be in [0, 1]"
        );
        anyhow::ensure!(
            self.mining.progress_capacity > 0,
            "mining.progress_capacity must be positive"
        );
        anyhow::ensure!(
            !self.cache.generic_domain.trim().is_empty(),
            "cache.generic_domain must not be empty"
        );
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
