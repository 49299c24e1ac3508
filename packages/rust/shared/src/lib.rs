//! Shared types, error model, and configuration for FloraCrawl.
//!
//! This crate is the foundation depended on by all other FloraCrawl crates.
//! It provides:
//! - [`FloraCrawlError`] — the unified error type
//! - Domain types ([`TaxonRank`], [`TaxonNode`], [`PageRecord`],
//!   [`CompletionEvent`], [`Lineage`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, DefaultsConfig, Politeness, PolitenessConfig, PoolSizes, PoolsConfig,
    RetryConfig, RetryPolicy, SourceEntry, config_dir, config_file_path, init_config, load_config,
    load_config_from, select_source,
};
pub use error::{FloraCrawlError, Result};
pub use types::{CompletionEvent, Lineage, PageRecord, TaxonNode, TaxonRank};
