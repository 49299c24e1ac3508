//! End-to-end crawl pipeline: config → ledger replay → crawl → report.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use floracrawl_crawler::{
    CrawlLimits, CrawlOrchestrator, CrawlProgress, CrawlSummary, PageFetcher,
};
use floracrawl_shared::{CrawlConfig, Result, TaxonRank};
use floracrawl_store::{CompletionLedger, RecordStore, record_count, replay};
use floracrawl_taxonomy::TaxonomyClient;

// ---------------------------------------------------------------------------
// CrawlReport
// ---------------------------------------------------------------------------

/// Result of one crawl invocation.
#[derive(Debug)]
pub struct CrawlReport {
    /// Identifier of this run (for log correlation).
    pub run_id: Uuid,
    /// Orchestrator counters for this run.
    pub summary: CrawlSummary,
    /// Total completed identifiers per rank after the run, across all runs.
    pub completed_by_rank: HashMap<TaxonRank, usize>,
    /// Path of the page record stream.
    pub records_path: PathBuf,
    /// Path of the completion ledger.
    pub ledger_path: PathBuf,
}

// ---------------------------------------------------------------------------
// run_crawl
// ---------------------------------------------------------------------------

/// Run (or resume) a crawl for the configured source.
///
/// 1. Replay the completion ledger into memory
/// 2. Open the record stream for appending
/// 3. Build the taxonomy client and page fetcher
/// 4. Run the orchestrator to completion of everything reachable
#[instrument(skip_all, fields(source = %config.source.name))]
pub async fn run_crawl(
    config: &CrawlConfig,
    progress: Arc<dyn CrawlProgress>,
) -> Result<CrawlReport> {
    let run_id = Uuid::now_v7();
    let ledger_path = config.ledger_path();
    let records_path = config.records_path();

    info!(
        %run_id,
        records = %records_path.display(),
        ledger = %ledger_path.display(),
        "starting crawl run"
    );

    let ledger = Arc::new(CompletionLedger::load(&ledger_path).await?);
    let records = Arc::new(RecordStore::open(&records_path).await?);

    let taxa = Arc::new(TaxonomyClient::new(
        &config.source,
        config.retry,
        config.request_timeout,
    )?);
    let pages = Arc::new(PageFetcher::new(
        config.retry,
        config.politeness,
        config.request_timeout,
    )?);

    let limits = CrawlLimits {
        pools: config.pools,
        leaf_rank: config.leaf_rank,
        max_in_flight: config.max_in_flight,
    };

    let orchestrator = CrawlOrchestrator::new(
        taxa,
        pages,
        records,
        ledger.clone(),
        limits,
        config.source.name.clone(),
        progress,
    );
    let summary = orchestrator.run().await?;

    let completed_by_rank = ledger.completed_counts().await;
    info!(
        %run_id,
        pages_fetched = summary.pages_fetched,
        nodes_completed = summary.nodes_completed,
        "crawl run finished"
    );

    Ok(CrawlReport {
        run_id,
        summary,
        completed_by_rank,
        records_path,
        ledger_path,
    })
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Read-only snapshot of a source's on-disk progress.
#[derive(Debug)]
pub struct SourceStatus {
    pub completed_by_rank: HashMap<TaxonRank, usize>,
    pub record_lines: usize,
    pub records_path: PathBuf,
    pub ledger_path: PathBuf,
}

/// Replay the ledger and count record lines without touching either file.
pub async fn source_status(config: &CrawlConfig) -> Result<SourceStatus> {
    let ledger_path = config.ledger_path();
    let records_path = config.records_path();

    let sets = replay(&ledger_path).await?;
    let completed_by_rank = sets.iter().map(|(rank, set)| (*rank, set.len())).collect();
    let record_lines = record_count(&records_path).await?;

    Ok(SourceStatus {
        completed_by_rank,
        record_lines,
        records_path,
        ledger_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use floracrawl_crawler::SilentProgress;
    use floracrawl_shared::{Politeness, PoolSizes, RetryPolicy, SourceEntry};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tree_entry(id: &str, title: &str) -> String {
        format!(
            r#"{{ "data": {{ "title": "{title}", "attr": {{ "href": "taxon/{id}" }} }}, "attr": {{ "id": "{id}" }} }}"#
        )
    }

    async fn mount_tree(server: &MockServer) {
        let roots = format!("[{}]", tree_entry("o1", "Fagales"));
        let families = format!(
            "[{},{}]",
            tree_entry("f1", "Fagaceae"),
            tree_entry("f2", "Betulaceae")
        );

        Mock::given(method("GET"))
            .and(path("/taxonTree"))
            .respond_with(ResponseTemplate::new(200).set_body_string(roots))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/taxonTree/o1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(families))
            .mount(server)
            .await;

        for id in ["o1", "f1", "f2"] {
            Mock::given(method("GET"))
                .and(path(format!("/taxon/{id}")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(format!("<html><body><h1>{id}</h1></body></html>")),
                )
                .mount(server)
                .await;
        }
    }

    fn test_config(server: &MockServer, output_root: PathBuf) -> CrawlConfig {
        CrawlConfig {
            source: SourceEntry {
                name: "Test Flora".into(),
                base_url: server.uri(),
                tree_api_url: format!("{}/taxonTree", server.uri()),
            },
            output_root,
            leaf_rank: TaxonRank::Family,
            max_in_flight: 8,
            pools: PoolSizes {
                order: 2,
                family: 2,
                genus: 2,
                species: 2,
                subspecies: 2,
            },
            retry: RetryPolicy {
                attempts: 3,
                status_backoff: Duration::from_millis(10),
                throttle_backoff: Duration::from_millis(10),
                error_backoff: Duration::from_millis(10),
            },
            politeness: Politeness::none(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn end_to_end_crawl_and_resume() {
        let server = MockServer::start().await;
        mount_tree(&server).await;

        let output_root =
            std::env::temp_dir().join(format!("floracrawl_pipeline_{}", Uuid::now_v7()));
        let config = test_config(&server, output_root.clone());

        // First run fetches everything.
        let report = run_crawl(&config, Arc::new(SilentProgress)).await.expect("first run");
        assert_eq!(report.summary.pages_fetched, 3);
        assert_eq!(report.summary.nodes_completed, 3);
        assert_eq!(report.completed_by_rank.get(&TaxonRank::Order), Some(&1));
        assert_eq!(report.completed_by_rank.get(&TaxonRank::Family), Some(&2));

        // Second run replays the ledger and only touches the root listing.
        let report = run_crawl(&config, Arc::new(SilentProgress)).await.expect("second run");
        assert_eq!(report.summary.pages_fetched, 0);
        assert_eq!(report.summary.subtrees_skipped, 1);

        let page_requests = server
            .received_requests()
            .await
            .expect("recorded requests")
            .iter()
            .filter(|r| r.url.path().starts_with("/taxon/"))
            .count();
        assert_eq!(page_requests, 3, "resume must not refetch pages");

        let status = source_status(&config).await.expect("status");
        assert_eq!(status.record_lines, 3);
        assert_eq!(status.completed_by_rank.get(&TaxonRank::Family), Some(&2));

        let _ = std::fs::remove_dir_all(&output_root);
    }

    #[tokio::test]
    async fn status_on_fresh_source_is_empty() {
        let server = MockServer::start().await;
        let output_root =
            std::env::temp_dir().join(format!("floracrawl_status_{}", Uuid::now_v7()));
        let config = test_config(&server, output_root);

        let status = source_status(&config).await.expect("status");
        assert!(status.completed_by_rank.is_empty());
        assert_eq!(status.record_lines, 0);
    }
}
