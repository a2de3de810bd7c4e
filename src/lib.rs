//! # termmine - terminology mining pipeline
//!
//! Turns extracted document text into verified glossary artifacts: pages are
//! split into token-bounded chunks, mined one chunk at a time against an
//! extraction/translation provider under a tokens-per-minute ceiling, and the
//! resulting candidates are resolved against a terminology store. Verified
//! terms are served as cached TSV glossaries.
//!
//! ## Architecture
//!
//! - **[`config`]** - JSON configuration with documented defaults
//! - **[`chunker`]** - Paragraph/sentence-aware chunking and processing estimates
//! - **[`mining`]** - Sequential mining processor, single-job slot, rate plan
//! - **[`resolver`]** - Insert / skip / conflict decisions against the store
//! - **[`glossary`]** - Fingerprint-keyed glossary cache and artifact stores
//! - **[`variation`]** - Case and plural variants, TSV rendering
//! - **[`service`]** - Extraction/translation provider trait and a mock
//! - **[`store`]** - Term and chunk store traits with in-memory implementations
//! - **[`db`]** - SQLite implementation of the stores

pub mod chunker;
pub mod config;
pub mod db;
pub mod glossary;
pub mod mining;
pub mod resolver;
pub mod service;
pub mod store;
pub mod variation;
