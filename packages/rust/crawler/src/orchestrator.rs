//! Rank-by-rank, depth-first crawl orchestration.
//!
//! Per-node state machine:
//! `Pending → Fetching → {Fetched | FetchFailed} → AwaitingChildren →
//! {Completed | Incomplete}`.
//!
//! Each rank transition fans the sibling set out over a fresh bounded pool,
//! so nested levels compound multiplicatively; a run-global semaphore caps
//! the product. Completion propagates post-order: a node is marked in the
//! ledger only once its own page is stored and every enumerated child
//! completed. Interrupting the process at any point leaves interrupted
//! nodes Incomplete, which is always safe to retry on the next run — the
//! record stream is at-least-once, the ledger is exact.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use floracrawl_shared::{
    FloraCrawlError, Lineage, PageRecord, PoolSizes, Result, TaxonNode, TaxonRank,
};
use floracrawl_store::{CompletionLedger, RecordStore};
use floracrawl_taxonomy::{ChildListing, TaxonomyClient};

use crate::fetcher::{FetchFailure, FetchOutcome, PageFetcher};
use crate::text::html_to_text;

// ---------------------------------------------------------------------------
// Source seams
// ---------------------------------------------------------------------------

/// Source of child taxa. Implemented by [`TaxonomyClient`] for the live
/// tree API and by in-memory fakes in tests.
#[async_trait]
pub trait TaxonSource: Send + Sync {
    /// Children of `parent_id` at `rank`; `None` enumerates the tree roots.
    async fn list_children(&self, parent_id: Option<&str>, rank: TaxonRank) -> ChildListing;
}

#[async_trait]
impl TaxonSource for TaxonomyClient {
    async fn list_children(&self, parent_id: Option<&str>, rank: TaxonRank) -> ChildListing {
        match parent_id {
            Some(id) => self.children(id, rank).await,
            None => self.roots(rank).await,
        }
    }
}

/// Source of page content. Implemented by [`PageFetcher`] for live HTTP.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        PageFetcher::fetch(self, url).await
    }
}

// ---------------------------------------------------------------------------
// Progress observer
// ---------------------------------------------------------------------------

/// Observer for crawl progress, for CLI reporting.
pub trait CrawlProgress: Send + Sync {
    /// A sibling set at `rank` is about to fan out.
    fn level_started(&self, rank: TaxonRank, siblings: usize);
    /// A node's own page was fetched and stored.
    fn page_fetched(&self, rank: TaxonRank, name: &str);
    /// A node's own page fetch gave up for this run.
    fn page_failed(&self, rank: TaxonRank, url: &str);
    /// A whole subtree was skipped via the ledger fast-path.
    fn subtree_skipped(&self, rank: TaxonRank, identifier: &str);
}

/// No-op progress observer for headless/test usage.
pub struct SilentProgress;

impl CrawlProgress for SilentProgress {
    fn level_started(&self, _rank: TaxonRank, _siblings: usize) {}
    fn page_fetched(&self, _rank: TaxonRank, _name: &str) {}
    fn page_failed(&self, _rank: TaxonRank, _url: &str) {}
    fn subtree_skipped(&self, _rank: TaxonRank, _identifier: &str) {}
}

// ---------------------------------------------------------------------------
// Outcomes, limits, stats
// ---------------------------------------------------------------------------

/// Terminal state of one node for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Own page stored and all enumerated children completed; in the ledger.
    Completed,
    /// Something under (or at) this node did not finish; retried next run.
    Incomplete,
}

/// Concurrency tunables for one run.
#[derive(Debug, Clone)]
pub struct CrawlLimits {
    /// Sibling pool size per rank. Pools nest, so the per-rank sizes
    /// multiply down the tree.
    pub pools: PoolSizes,
    /// Deepest rank fetched; no enumeration happens below it.
    pub leaf_rank: TaxonRank,
    /// Cap on concurrent page fetches across all nested pools.
    pub max_in_flight: usize,
}

/// Counters accumulated across one run.
#[derive(Debug, Default)]
struct CrawlStats {
    pages_fetched: AtomicUsize,
    pages_failed: AtomicUsize,
    records_written: AtomicUsize,
    subtrees_skipped: AtomicUsize,
    nodes_completed: AtomicUsize,
    listings_unknown: AtomicUsize,
}

/// Summary of one finished run.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub records_written: usize,
    pub subtrees_skipped: usize,
    pub nodes_completed: usize,
    pub listings_unknown: usize,
    pub duration: Duration,
}

type NodeFuture = Pin<Box<dyn Future<Output = NodeOutcome> + Send>>;

// ---------------------------------------------------------------------------
// CrawlOrchestrator
// ---------------------------------------------------------------------------

/// Composes taxonomy enumeration, page fetching, the record stream, and
/// the completion ledger into one resumable traversal.
pub struct CrawlOrchestrator {
    taxa: Arc<dyn TaxonSource>,
    pages: Arc<dyn PageSource>,
    records: Arc<RecordStore>,
    ledger: Arc<CompletionLedger>,
    progress: Arc<dyn CrawlProgress>,
    limits: CrawlLimits,
    source_name: String,
    in_flight: Semaphore,
    stats: CrawlStats,
}

impl CrawlOrchestrator {
    pub fn new(
        taxa: Arc<dyn TaxonSource>,
        pages: Arc<dyn PageSource>,
        records: Arc<RecordStore>,
        ledger: Arc<CompletionLedger>,
        limits: CrawlLimits,
        source_name: impl Into<String>,
        progress: Arc<dyn CrawlProgress>,
    ) -> Arc<Self> {
        let in_flight = Semaphore::new(limits.max_in_flight.max(1));
        Arc::new(Self {
            taxa,
            pages,
            records,
            ledger,
            progress,
            limits,
            source_name: source_name.into(),
            in_flight,
            stats: CrawlStats::default(),
        })
    }

    /// Run (or resume) the crawl to completion of everything reachable.
    ///
    /// Only root enumeration failure is an error — there is nothing to
    /// traverse. Every other failure is isolated to its node and ancestors.
    pub async fn run(self: Arc<Self>) -> Result<CrawlSummary> {
        let start = Instant::now();
        info!(
            source = %self.source_name,
            leaf_rank = %self.limits.leaf_rank,
            max_in_flight = self.limits.max_in_flight,
            "starting crawl"
        );

        let roots = match self.taxa.list_children(None, TaxonRank::Order).await {
            ChildListing::Children(roots) => roots,
            ChildListing::Unknown => {
                return Err(FloraCrawlError::Network(
                    "root taxon enumeration failed after retries".into(),
                ));
            }
        };
        info!(count = roots.len(), "root taxa enumerated");

        self.clone()
            .crawl_level(roots, TaxonRank::Order, Lineage::default())
            .await;

        let summary = self.summary(start.elapsed());
        info!(
            pages_fetched = summary.pages_fetched,
            pages_failed = summary.pages_failed,
            subtrees_skipped = summary.subtrees_skipped,
            nodes_completed = summary.nodes_completed,
            duration_ms = summary.duration.as_millis(),
            "crawl finished"
        );
        Ok(summary)
    }

    /// Fan a sibling set out over a fresh bounded pool.
    ///
    /// Returns true iff every sibling ended the run Completed. Sibling
    /// ordering is whatever the pool schedules; only ancestor-before-
    /// descendant ordering is guaranteed by the per-node flow.
    async fn crawl_level(
        self: Arc<Self>,
        nodes: Vec<TaxonNode>,
        rank: TaxonRank,
        lineage: Lineage,
    ) -> bool {
        if nodes.is_empty() {
            return true;
        }
        self.progress.level_started(rank, nodes.len());

        let pool = Arc::new(Semaphore::new(self.limits.pools.for_rank(rank)));
        let mut tasks = JoinSet::new();
        for node in nodes {
            let pool = pool.clone();
            let fut = self.clone().crawl_node(node, lineage.clone());
            tasks.spawn(async move {
                let _permit = pool.acquire().await.expect("sibling pool closed");
                fut.await
            });
        }

        let mut all_completed = true;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(NodeOutcome::Completed) => {}
                Ok(NodeOutcome::Incomplete) => all_completed = false,
                Err(e) => {
                    warn!(error = %e, "sibling task aborted");
                    all_completed = false;
                }
            }
        }
        all_completed
    }

    /// Boxed recursion point: the traversal depth is data-driven.
    fn crawl_node(self: Arc<Self>, node: TaxonNode, lineage: Lineage) -> NodeFuture {
        Box::pin(async move { self.crawl_node_inner(node, lineage).await })
    }

    async fn crawl_node_inner(self: Arc<Self>, node: TaxonNode, lineage: Lineage) -> NodeOutcome {
        // Skip fast-path: a completed node's whole subtree is settled, with
        // zero network activity. This is what makes re-runs cheap.
        if self.ledger.is_completed(node.rank, &node.id).await {
            self.stats.subtrees_skipped.fetch_add(1, Ordering::Relaxed);
            self.progress.subtree_skipped(node.rank, &node.id);
            debug!(rank = %node.rank, id = %node.id, "subtree already completed, skipping");
            return NodeOutcome::Completed;
        }

        let lineage = lineage.with(node.rank, &node.name);

        // Fetching → {Fetched | FetchFailed}. A failed fetch does not stop
        // the descent; it only pins this node (and its ancestors) below
        // Completed for this run.
        let fetched = self.fetch_and_store(&node, &lineage).await;

        // AwaitingChildren. The parent's own fetch has been attempted by
        // now, which is the only ordering the children need.
        let children_completed = if node.rank >= self.limits.leaf_rank {
            true
        } else if let Some(child_rank) = node.rank.child() {
            match self.taxa.list_children(Some(&node.id), child_rank).await {
                ChildListing::Children(children) => {
                    self.clone().crawl_level(children, child_rank, lineage).await
                }
                ChildListing::Unknown => {
                    // "No children" cannot be assumed; completing here
                    // would silently orphan the real subtree.
                    self.stats.listings_unknown.fetch_add(1, Ordering::Relaxed);
                    warn!(rank = %node.rank, id = %node.id, "child enumeration unknown, holding completion");
                    false
                }
            }
        } else {
            true
        };

        if fetched && children_completed {
            match self.ledger.mark_completed(node.rank, &node.id).await {
                Ok(()) => {
                    self.stats.nodes_completed.fetch_add(1, Ordering::Relaxed);
                    NodeOutcome::Completed
                }
                Err(e) => {
                    warn!(rank = %node.rank, id = %node.id, error = %e, "failed to record completion");
                    NodeOutcome::Incomplete
                }
            }
        } else {
            NodeOutcome::Incomplete
        }
    }

    /// Fetch the node's own page and append its record.
    ///
    /// Returns true iff the record is durably in the stream.
    async fn fetch_and_store(&self, node: &TaxonNode, lineage: &Lineage) -> bool {
        let outcome = {
            let _permit = self
                .in_flight
                .acquire()
                .await
                .expect("in-flight semaphore closed");
            self.pages.fetch(&node.url).await
        };

        match outcome {
            FetchOutcome::Content(html) => {
                self.stats.pages_fetched.fetch_add(1, Ordering::Relaxed);
                self.progress.page_fetched(node.rank, &node.name);

                let text = html_to_text(&html);
                let record = PageRecord::new(node, lineage, &self.source_name, html, text);
                match self.records.append(&record).await {
                    Ok(()) => {
                        self.stats.records_written.fetch_add(1, Ordering::Relaxed);
                        true
                    }
                    Err(e) => {
                        warn!(url = %node.url, error = %e, "record append failed");
                        false
                    }
                }
            }
            FetchOutcome::Failed(failure) => {
                self.stats.pages_failed.fetch_add(1, Ordering::Relaxed);
                self.progress.page_failed(node.rank, &node.url);
                match failure {
                    FetchFailure::NotFound => {
                        warn!(url = %node.url, "page not found, node held incomplete this run");
                    }
                    FetchFailure::Exhausted => {
                        warn!(url = %node.url, "page fetch exhausted retries");
                    }
                }
                false
            }
        }
    }

    fn summary(&self, duration: Duration) -> CrawlSummary {
        CrawlSummary {
            pages_fetched: self.stats.pages_fetched.load(Ordering::Relaxed),
            pages_failed: self.stats.pages_failed.load(Ordering::Relaxed),
            records_written: self.stats.records_written.load(Ordering::Relaxed),
            subtrees_skipped: self.stats.subtrees_skipped.load(Ordering::Relaxed),
            nodes_completed: self.stats.nodes_completed.load(Ordering::Relaxed),
            listings_unknown: self.stats.listings_unknown.load(Ordering::Relaxed),
            duration,
        }
    }
}
