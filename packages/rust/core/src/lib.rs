//! Core pipeline orchestration for FloraCrawl.
//!
//! Ties configuration, the taxonomy client, the page fetcher, the record
//! stream, and the completion ledger together into one resumable crawl
//! invocation (`run_crawl`), plus read-only status inspection for the CLI.

pub mod pipeline;

pub use pipeline::{CrawlReport, SourceStatus, run_crawl, source_status};
