//! Core domain types for the taxonomy crawl.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TaxonRank
// ---------------------------------------------------------------------------

/// Taxonomic level of a node, ordered from the crawl root down.
///
/// Serialized lowercase (`order`, `family`, ...) in both the record stream
/// and the completion ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaxonRank {
    Order,
    Family,
    Genus,
    Species,
    Subspecies,
}

impl TaxonRank {
    /// All ranks, root-most first.
    pub const ALL: [TaxonRank; 5] = [
        TaxonRank::Order,
        TaxonRank::Family,
        TaxonRank::Genus,
        TaxonRank::Species,
        TaxonRank::Subspecies,
    ];

    /// Lowercase wire name of this rank.
    pub fn as_str(self) -> &'static str {
        match self {
            TaxonRank::Order => "order",
            TaxonRank::Family => "family",
            TaxonRank::Genus => "genus",
            TaxonRank::Species => "species",
            TaxonRank::Subspecies => "subspecies",
        }
    }

    /// The next rank down the hierarchy, or `None` below subspecies.
    pub fn child(self) -> Option<TaxonRank> {
        match self {
            TaxonRank::Order => Some(TaxonRank::Family),
            TaxonRank::Family => Some(TaxonRank::Genus),
            TaxonRank::Genus => Some(TaxonRank::Species),
            TaxonRank::Species => Some(TaxonRank::Subspecies),
            TaxonRank::Subspecies => None,
        }
    }
}

impl std::fmt::Display for TaxonRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaxonRank {
    type Err = crate::FloraCrawlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "order" => Ok(TaxonRank::Order),
            "family" => Ok(TaxonRank::Family),
            "genus" => Ok(TaxonRank::Genus),
            "species" => Ok(TaxonRank::Species),
            "subspecies" => Ok(TaxonRank::Subspecies),
            other => Err(crate::FloraCrawlError::validation(format!(
                "unknown rank '{other}' (expected order, family, genus, species, or subspecies)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TaxonNode
// ---------------------------------------------------------------------------

/// A node in the taxonomy tree, produced by child enumeration.
///
/// Traversal state only — never persisted as a standalone entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonNode {
    /// Opaque site-assigned identifier (e.g. `wfo-4000000123`).
    pub id: String,
    /// Display name of the taxon.
    pub name: String,
    /// Absolute URL of the taxon's description page.
    pub url: String,
    /// Taxonomic level of this node.
    pub rank: TaxonRank,
}

// ---------------------------------------------------------------------------
// Lineage
// ---------------------------------------------------------------------------

/// Ancestor names accumulated while descending the tree.
///
/// Each node's record carries the names of every ancestor plus its own,
/// so a species line can be read without joining against its parents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
    pub subspecies: Option<String>,
}

impl Lineage {
    /// A copy of this lineage with `name` filled in at `rank`.
    pub fn with(&self, rank: TaxonRank, name: &str) -> Lineage {
        let mut next = self.clone();
        let slot = match rank {
            TaxonRank::Order => &mut next.order,
            TaxonRank::Family => &mut next.family,
            TaxonRank::Genus => &mut next.genus,
            TaxonRank::Species => &mut next.species,
            TaxonRank::Subspecies => &mut next.subspecies,
        };
        *slot = Some(name.to_string());
        next
    }
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// One line of the page record stream.
///
/// Field order matters: it is the wire order of the JSONL output. Name
/// fields above the node's own rank are null, as is `subspecies` for
/// everything shallower than a subspecies page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub order_name: Option<String>,
    pub family_name: Option<String>,
    pub genus_name: Option<String>,
    pub species_name: Option<String>,
    pub subspecies: Option<String>,
    /// Human-readable name of the upstream site.
    pub source: String,
    /// Site-assigned identifier of the taxon.
    pub identifier: String,
    pub page_type: TaxonRank,
    pub url: String,
    pub raw_html: String,
    /// Plain text derived from `raw_html`.
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
}

impl PageRecord {
    /// Build the record for `node`, with `lineage` already including the
    /// node's own name at its rank.
    pub fn new(
        node: &TaxonNode,
        lineage: &Lineage,
        source: &str,
        raw_html: String,
        raw_text: String,
    ) -> Self {
        Self {
            order_name: lineage.order.clone(),
            family_name: lineage.family.clone(),
            genus_name: lineage.genus.clone(),
            species_name: lineage.species.clone(),
            subspecies: lineage.subspecies.clone(),
            source: source.to_string(),
            identifier: node.id.clone(),
            page_type: node.rank,
            url: node.url.clone(),
            raw_html,
            raw_text,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// CompletionEvent
// ---------------------------------------------------------------------------

/// One line of the completion ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub page_type: TaxonRank,
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
}

impl CompletionEvent {
    pub fn new(rank: TaxonRank, identifier: impl Into<String>) -> Self {
        Self {
            page_type: rank,
            identifier: identifier.into(),
            timestamp: Utc::now(),
        }
    }
}
