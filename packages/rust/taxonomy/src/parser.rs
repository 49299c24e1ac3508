//! Parsing of the tree API payload into taxon nodes.
//!
//! The API returns a JSON array of entries shaped
//! `{ "data": { "title": ..., "attr": { "href": ... } }, "attr": { "id": ... } }`.
//! Entries missing any of title/href/id are skipped; relative hrefs are
//! resolved against the site base URL.

use serde::Deserialize;
use url::Url;

use floracrawl_shared::{FloraCrawlError, Result, TaxonNode, TaxonRank};

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(default)]
    data: Option<EntryData>,
    #[serde(default)]
    attr: Option<EntryAttr>,
}

#[derive(Debug, Deserialize)]
struct EntryData {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    attr: Option<DataAttr>,
}

#[derive(Debug, Deserialize)]
struct DataAttr {
    #[serde(default)]
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntryAttr {
    #[serde(default)]
    id: Option<String>,
}

/// Parse a tree API response body into nodes at `rank`.
///
/// Fails only when the body is not a JSON array at all; degenerate entries
/// inside a well-formed array are silently dropped, matching the upstream
/// API's habit of mixing decorative entries into the tree.
pub fn parse_children(body: &str, rank: TaxonRank, base: &Url) -> Result<Vec<TaxonNode>> {
    let entries: Vec<TreeEntry> = serde_json::from_str(body)
        .map_err(|e| FloraCrawlError::parse(format!("tree API payload: {e}")))?;

    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(data) = entry.data else { continue };
        let (Some(title), Some(href)) = (
            data.title.filter(|t| !t.is_empty()),
            data.attr.and_then(|a| a.href).filter(|h| !h.is_empty()),
        ) else {
            continue;
        };
        let Some(id) = entry
            .attr
            .and_then(|a| a.id)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };

        let Some(url) = resolve_href(&href, base) else {
            tracing::debug!(href, "skipping child with unresolvable href");
            continue;
        };

        nodes.push(TaxonNode {
            id,
            name: title,
            url,
            rank,
        });
    }

    Ok(nodes)
}

/// Resolve an href that may be absolute or site-relative.
fn resolve_href(href: &str, base: &Url) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        Url::parse(href).ok().map(String::from)
    } else {
        base.join(href).ok().map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://flora.example.org").unwrap()
    }

    #[test]
    fn parses_fixture_payload() {
        let body = std::fs::read_to_string("../../../fixtures/json/tree_children.fixture.json")
            .expect("read fixture");
        let nodes = parse_children(&body, TaxonRank::Family, &base()).expect("parse");

        // The fixture has four entries; one is missing its id and is dropped.
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].name, "Fagaceae");
        assert_eq!(nodes[0].id, "wfo-7000000222");
        assert_eq!(
            nodes[0].url,
            "https://flora.example.org/taxon/wfo-7000000222"
        );
        assert!(nodes.iter().all(|n| n.rank == TaxonRank::Family));
    }

    #[test]
    fn absolute_hrefs_pass_through() {
        let body = r#"[{
            "data": {
                "title": "Quercus",
                "attr": { "href": "https://other.example.net/taxon/q" }
            },
            "attr": { "id": "q-1" }
        }]"#;
        let nodes = parse_children(body, TaxonRank::Genus, &base()).expect("parse");
        assert_eq!(nodes[0].url, "https://other.example.net/taxon/q");
    }

    #[test]
    fn empty_array_is_a_definite_answer() {
        let nodes = parse_children("[]", TaxonRank::Species, &base()).expect("parse");
        assert!(nodes.is_empty());
    }

    #[test]
    fn non_array_body_is_an_error() {
        assert!(parse_children("{\"error\": true}", TaxonRank::Order, &base()).is_err());
        assert!(parse_children("<html>busy</html>", TaxonRank::Order, &base()).is_err());
    }

    #[test]
    fn entries_without_title_or_href_are_skipped() {
        let body = r#"[
            { "data": { "title": "", "attr": { "href": "taxon/x" } }, "attr": { "id": "x" } },
            { "data": { "title": "Pinus", "attr": {} }, "attr": { "id": "p" } },
            { "attr": { "id": "orphan" } }
        ]"#;
        let nodes = parse_children(body, TaxonRank::Genus, &base()).expect("parse");
        assert!(nodes.is_empty());
    }
}
