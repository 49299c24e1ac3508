//! Application configuration for FloraCrawl.
//!
//! User config lives at `~/.floracrawl/floracrawl.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FloraCrawlError, Result};
use crate::types::TaxonRank;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "floracrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".floracrawl";

// ---------------------------------------------------------------------------
// Config structs (matching floracrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Sibling pool sizes per rank.
    #[serde(default)]
    pub pools: PoolsConfig,

    /// Fetch retry/backoff policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-request politeness delay.
    #[serde(default)]
    pub politeness: PolitenessConfig,

    /// Registered taxonomy sources.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            pools: PoolsConfig::default(),
            retry: RetryConfig::default(),
            politeness: PolitenessConfig::default(),
            sources: default_sources(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for record streams and ledgers.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Deepest rank whose own page is fetched; ranks below it are not
    /// enumerated.
    #[serde(default = "default_leaf_rank")]
    pub leaf_rank: String,

    /// Run-global cap on concurrent page fetches across all nested pools.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            leaf_rank: default_leaf_rank(),
            max_in_flight: default_max_in_flight(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_output_dir() -> String {
    "~/floracrawl-data".into()
}
fn default_leaf_rank() -> String {
    "species".into()
}
fn default_max_in_flight() -> usize {
    24
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// `[pools]` section — sibling worker counts per rank.
///
/// A fresh pool of this size is created at every rank transition, so nested
/// levels compound: with `family = 4` and `genus = 4`, up to 16 genus
/// workers can exist under one in-flight order. `[defaults] max_in_flight`
/// caps the product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    #[serde(default = "default_order_pool")]
    pub order: usize,
    #[serde(default = "default_family_pool")]
    pub family: usize,
    #[serde(default = "default_genus_pool")]
    pub genus: usize,
    #[serde(default = "default_species_pool")]
    pub species: usize,
    #[serde(default = "default_species_pool")]
    pub subspecies: usize,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            order: default_order_pool(),
            family: default_family_pool(),
            genus: default_genus_pool(),
            species: default_species_pool(),
            subspecies: default_species_pool(),
        }
    }
}

fn default_order_pool() -> usize {
    3
}
fn default_family_pool() -> usize {
    4
}
fn default_genus_pool() -> usize {
    4
}
fn default_species_pool() -> usize {
    5
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempt bound per URL, including the first request.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Backoff after a non-200, non-404 HTTP status.
    #[serde(default = "default_status_backoff_secs")]
    pub status_backoff_secs: u64,

    /// Long cool-down after an abrupt transport/TLS termination (upstream
    /// throttling).
    #[serde(default = "default_throttle_backoff_secs")]
    pub throttle_backoff_secs: u64,

    /// Backoff after any other transport error.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            status_backoff_secs: default_status_backoff_secs(),
            throttle_backoff_secs: default_throttle_backoff_secs(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

fn default_attempts() -> u32 {
    5
}
fn default_status_backoff_secs() -> u64 {
    10
}
fn default_throttle_backoff_secs() -> u64 {
    180
}
fn default_error_backoff_secs() -> u64 {
    3
}

/// `[politeness]` section — randomized delay after every page fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_min_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    3000
}

/// `[[sources]]` entry — a registered taxonomy site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Human-readable name, recorded in every page record.
    pub name: String,
    /// Site base URL, used to resolve relative hrefs from the tree API.
    pub base_url: String,
    /// Tree API endpoint; children of taxon `X` live at `{tree_api_url}/X`.
    pub tree_api_url: String,
}

impl SourceEntry {
    /// Filesystem-safe slug derived from the source name.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.name.len());
        for c in self.name.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('_') {
                slug.push('_');
            }
        }
        slug.trim_matches('_').to_string()
    }
}

fn default_sources() -> Vec<SourceEntry> {
    vec![SourceEntry {
        name: "World Flora Online".into(),
        base_url: "https://www.worldfloraonline.org".into(),
        tree_api_url: "https://www.worldfloraonline.org/taxonTree".into(),
    }]
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Sibling pool sizes per rank (runtime form).
#[derive(Debug, Clone, Copy)]
pub struct PoolSizes {
    pub order: usize,
    pub family: usize,
    pub genus: usize,
    pub species: usize,
    pub subspecies: usize,
}

impl PoolSizes {
    /// Pool size for siblings at `rank`; always at least 1.
    pub fn for_rank(&self, rank: TaxonRank) -> usize {
        let size = match rank {
            TaxonRank::Order => self.order,
            TaxonRank::Family => self.family,
            TaxonRank::Genus => self.genus,
            TaxonRank::Species => self.species,
            TaxonRank::Subspecies => self.subspecies,
        };
        size.max(1)
    }
}

impl From<&PoolsConfig> for PoolSizes {
    fn from(config: &PoolsConfig) -> Self {
        Self {
            order: config.order,
            family: config.family,
            genus: config.genus,
            species: config.species,
            subspecies: config.subspecies,
        }
    }
}

/// Tiered retry policy (runtime form).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub status_backoff: Duration,
    pub throttle_backoff: Duration,
    pub error_backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            status_backoff: Duration::from_secs(config.status_backoff_secs),
            throttle_backoff: Duration::from_secs(config.throttle_backoff_secs),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
        }
    }
}

/// Politeness delay range (runtime form).
#[derive(Debug, Clone, Copy)]
pub struct Politeness {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Politeness {
    /// No delay at all, for tests and dry runs.
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

impl From<&PolitenessConfig> for Politeness {
    fn from(config: &PolitenessConfig) -> Self {
        let min = Duration::from_millis(config.min_delay_ms);
        let max = Duration::from_millis(config.max_delay_ms.max(config.min_delay_ms));
        Self {
            min_delay: min,
            max_delay: max,
        }
    }
}

/// Runtime crawl configuration for one source — merged from config file +
/// CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// The source being crawled.
    pub source: SourceEntry,
    /// Root directory holding `<slug>/pages.jsonl` and
    /// `<slug>/completed_items.jsonl`.
    pub output_root: PathBuf,
    /// Deepest rank fetched.
    pub leaf_rank: TaxonRank,
    /// Run-global cap on concurrent page fetches.
    pub max_in_flight: usize,
    pub pools: PoolSizes,
    pub retry: RetryPolicy,
    pub politeness: Politeness,
    pub request_timeout: Duration,
}

impl CrawlConfig {
    /// Build the runtime config for `source` from the app config.
    pub fn for_source(config: &AppConfig, source: &SourceEntry) -> Result<Self> {
        let leaf_rank: TaxonRank = config.defaults.leaf_rank.parse()?;
        Ok(Self {
            source: source.clone(),
            output_root: expand_home(&config.defaults.output_dir),
            leaf_rank,
            max_in_flight: config.defaults.max_in_flight.max(1),
            pools: PoolSizes::from(&config.pools),
            retry: RetryPolicy::from(&config.retry),
            politeness: Politeness::from(&config.politeness),
            request_timeout: Duration::from_secs(config.defaults.request_timeout_secs),
        })
    }

    /// Directory holding this source's record stream and ledger.
    pub fn source_dir(&self) -> PathBuf {
        self.output_root.join(self.source.slug())
    }

    /// Path of the page record stream.
    pub fn records_path(&self) -> PathBuf {
        self.source_dir().join("pages.jsonl")
    }

    /// Path of the completion ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.source_dir().join("completed_items.jsonl")
    }
}

/// Expand a leading `~/` against the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.floracrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FloraCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.floracrawl/floracrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does
/// not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FloraCrawlError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| FloraCrawlError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FloraCrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FloraCrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FloraCrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Find a configured source by name (case-insensitive); defaults to the
/// first entry when `name` is `None`.
pub fn select_source<'a>(config: &'a AppConfig, name: Option<&str>) -> Result<&'a SourceEntry> {
    match name {
        Some(wanted) => config
            .sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                FloraCrawlError::config(format!(
                    "no source named '{wanted}' in config (run `floracrawl sources`)"
                ))
            }),
        None => config
            .sources
            .first()
            .ok_or_else(|| FloraCrawlError::config("no sources configured")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("World Flora Online"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retry.attempts, 5);
        assert_eq!(parsed.pools.species, 5);
        assert_eq!(parsed.defaults.leaf_rank, "species");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
max_in_flight = 8

[[sources]]
name = "Flora of China"
base_url = "http://www.efloras.org"
tree_api_url = "http://www.efloras.org/tree"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.max_in_flight, 8);
        assert_eq!(config.defaults.request_timeout_secs, 30);
        assert_eq!(config.retry.throttle_backoff_secs, 180);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].slug(), "flora_of_china");
    }

    #[test]
    fn crawl_config_for_source() {
        let app = AppConfig::default();
        let source = app.sources[0].clone();
        let crawl = CrawlConfig::for_source(&app, &source).expect("crawl config");

        assert_eq!(crawl.leaf_rank, TaxonRank::Species);
        assert_eq!(crawl.pools.for_rank(TaxonRank::Order), 3);
        assert_eq!(crawl.retry.status_backoff, Duration::from_secs(10));
        assert!(
            crawl
                .records_path()
                .ends_with("world_flora_online/pages.jsonl")
        );
        assert!(
            crawl
                .ledger_path()
                .ends_with("world_flora_online/completed_items.jsonl")
        );
    }

    #[test]
    fn bad_leaf_rank_is_rejected() {
        let mut app = AppConfig::default();
        app.defaults.leaf_rank = "cultivar".into();
        let source = app.sources[0].clone();
        let result = CrawlConfig::for_source(&app, &source);
        assert!(result.is_err());
    }

    #[test]
    fn select_source_by_name_and_default() {
        let config = AppConfig::default();
        let by_default = select_source(&config, None).expect("default source");
        assert_eq!(by_default.name, "World Flora Online");

        let by_name = select_source(&config, Some("world flora online")).expect("named");
        assert_eq!(by_name.name, "World Flora Online");

        assert!(select_source(&config, Some("missing")).is_err());
    }

    #[test]
    fn politeness_range_never_inverts() {
        let config = PolitenessConfig {
            min_delay_ms: 500,
            max_delay_ms: 100,
        };
        let politeness = Politeness::from(&config);
        assert!(politeness.max_delay >= politeness.min_delay);
    }
}
