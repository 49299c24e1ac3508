//! Child enumeration against an external taxonomy tree API.
//!
//! The tree API serves the children of a taxon as a JSON array:
//! `GET {tree_api_url}` lists the root taxa (orders) and
//! `GET {tree_api_url}/{taxon_id}` lists the children of `taxon_id`.
//! Responses are retried with a flat backoff; a run of failures ends in
//! [`ChildListing::Unknown`] rather than an error, because a failed
//! enumeration must never be mistaken for "this taxon has no children".

mod parser;

pub use parser::parse_children;

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use floracrawl_shared::{
    FloraCrawlError, Result, RetryPolicy, SourceEntry, TaxonNode, TaxonRank,
};

/// User-Agent string for tree API requests.
const USER_AGENT: &str = concat!("FloraCrawl/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// ChildListing
// ---------------------------------------------------------------------------

/// Outcome of one child enumeration.
#[derive(Debug, Clone)]
pub enum ChildListing {
    /// A definite answer from the API, possibly empty.
    Children(Vec<TaxonNode>),
    /// Enumeration failed after retries (or the payload was garbage);
    /// "no children" cannot be assumed, so the parent must not complete.
    Unknown,
}

// ---------------------------------------------------------------------------
// TaxonomyClient
// ---------------------------------------------------------------------------

/// Client for the hierarchical tree API of one taxonomy site.
pub struct TaxonomyClient {
    client: Client,
    tree_api: String,
    base_url: Url,
    retry: RetryPolicy,
}

impl TaxonomyClient {
    /// Build a client for `source` with the given retry policy and request
    /// timeout.
    pub fn new(source: &SourceEntry, retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&source.base_url).map_err(|e| {
            FloraCrawlError::config(format!("invalid base_url '{}': {e}", source.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FloraCrawlError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            tree_api: source.tree_api_url.trim_end_matches('/').to_string(),
            base_url,
            retry,
        })
    }

    /// Enumerate the root taxa of the tree at `rank` (normally orders).
    pub async fn roots(&self, rank: TaxonRank) -> ChildListing {
        let url = self.tree_api.clone();
        self.list(&url, rank).await
    }

    /// Enumerate the children of `taxon_id`, producing nodes at `child_rank`.
    pub async fn children(&self, taxon_id: &str, child_rank: TaxonRank) -> ChildListing {
        let url = format!("{}/{}", self.tree_api, taxon_id);
        self.list(&url, child_rank).await
    }

    async fn list(&self, url: &str, rank: TaxonRank) -> ChildListing {
        for attempt in 1..=self.retry.attempts {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::OK {
                        match response.text().await {
                            Ok(body) => {
                                match parse_children(&body, rank, &self.base_url) {
                                    Ok(nodes) => {
                                        debug!(url, rank = %rank, count = nodes.len(), "children enumerated");
                                        return ChildListing::Children(nodes);
                                    }
                                    Err(e) => {
                                        // A 200 with a non-JSON body is not
                                        // transient; retrying won't help.
                                        warn!(url, error = %e, "unparseable tree API payload");
                                        return ChildListing::Unknown;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(url, attempt, error = %e, "tree API body read failed");
                            }
                        }
                    } else if status == StatusCode::NOT_FOUND {
                        // The API definitively does not know this taxon.
                        debug!(url, "tree API returned 404, treating as no children");
                        return ChildListing::Children(Vec::new());
                    } else {
                        warn!(url, attempt, %status, "tree API returned non-success status");
                    }
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "tree API request failed");
                }
            }

            if attempt < self.retry.attempts {
                tokio::time::sleep(self.retry.status_backoff).await;
            }
        }

        warn!(url, attempts = self.retry.attempts, "child enumeration exhausted retries");
        ChildListing::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_source(server: &MockServer) -> SourceEntry {
        SourceEntry {
            name: "Test Flora".into(),
            base_url: server.uri(),
            tree_api_url: format!("{}/taxonTree", server.uri()),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            status_backoff: Duration::from_millis(20),
            throttle_backoff: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
        }
    }

    fn client_for(server: &MockServer) -> TaxonomyClient {
        TaxonomyClient::new(&test_source(server), fast_retry(), Duration::from_secs(5))
            .expect("build client")
    }

    #[tokio::test]
    async fn enumerates_children_from_api() {
        let server = MockServer::start().await;
        let body = r#"[
            { "data": { "title": "Quercus", "attr": { "href": "taxon/g-1" } }, "attr": { "id": "g-1" } },
            { "data": { "title": "Fagus", "attr": { "href": "taxon/g-2" } }, "attr": { "id": "g-2" } }
        ]"#;

        Mock::given(method("GET"))
            .and(path("/taxonTree/f-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.children("f-1", TaxonRank::Genus).await {
            ChildListing::Children(nodes) => {
                assert_eq!(nodes.len(), 2);
                assert_eq!(nodes[0].name, "Quercus");
                assert_eq!(nodes[0].rank, TaxonRank::Genus);
                assert!(nodes[0].url.ends_with("/taxon/g-1"));
            }
            ChildListing::Unknown => panic!("expected a definite listing"),
        }
    }

    #[tokio::test]
    async fn roots_hit_the_bare_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/taxonTree"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.roots(TaxonRank::Order).await {
            ChildListing::Children(nodes) => assert!(nodes.is_empty()),
            ChildListing::Unknown => panic!("expected a definite listing"),
        }
    }

    #[tokio::test]
    async fn not_found_means_no_children() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/taxonTree/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.children("gone", TaxonRank::Family).await {
            ChildListing::Children(nodes) => assert!(nodes.is_empty()),
            ChildListing::Unknown => panic!("404 is a definite answer"),
        }
    }

    #[tokio::test]
    async fn server_errors_exhaust_to_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/taxonTree/f-1"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let start = Instant::now();
        let listing = client.children("f-1", TaxonRank::Genus).await;

        assert!(matches!(listing, ChildListing::Unknown));
        // Two backoff sleeps between three attempts.
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn garbage_payload_is_unknown_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/taxonTree/f-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let listing = client.children("f-1", TaxonRank::Genus).await;
        assert!(matches!(listing, ChildListing::Unknown));
    }
}
