//! Page fetching, plain-text derivation, and the crawl orchestrator.
//!
//! This crate provides:
//! - [`PageFetcher`] — tiered-retry HTTP fetcher with politeness delays
//! - [`html_to_text`] — the plain-text pass applied to every stored page
//! - [`CrawlOrchestrator`] — the resumable, concurrency-bounded traversal
//! - [`TaxonSource`] / [`PageSource`] — the seams tests fake out

pub mod fetcher;
pub mod orchestrator;
pub mod text;

pub use fetcher::{FetchFailure, FetchOutcome, PageFetcher};
pub use orchestrator::{
    CrawlLimits, CrawlOrchestrator, CrawlProgress, CrawlSummary, NodeOutcome, PageSource,
    SilentProgress, TaxonSource,
};
pub use text::html_to_text;
