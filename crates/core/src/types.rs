use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::CrawlError;

/// How a page was classified by the Classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Advertisement,
    Catalog,
    Other,
    /// Never visited, or visit outcome unknown (e.g. store unreachable).
    Unknown,
}

impl Default for PageKind {
    fn default() -> Self {
        PageKind::Unknown
    }
}

/// Outcome of the last visit to a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Success,
    Failed,
    Skipped,
}

/// Persistent per-URL bookkeeping record (FingerprintStore row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub origin: String,
    /// Hex digest of the content features; empty string means "no successful
    /// visit yet" (reflects the *last successful* visit only).
    pub content_hash: String,
    pub last_crawled: DateTime<Utc>,
    pub last_normalized: Option<DateTime<Utc>>,
    pub last_status: UrlStatus,
    pub property_count: u64,
    pub page_kind: PageKind,
    pub confidence: f64,
    pub error_text: Option<String>,
}

impl UrlRecord {
    pub fn new_unvisited(url: &str) -> Self {
        let origin = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            url: url.to_string(),
            origin,
            content_hash: String::new(),
            last_crawled: DateTime::<Utc>::MIN_UTC,
            last_normalized: None,
            last_status: UrlStatus::Skipped,
            property_count: 0,
            page_kind: PageKind::Unknown,
            confidence: 0.0,
            error_text: None,
        }
    }

    /// `last_normalized` must never move past `last_crawled`.
    pub fn is_well_formed(&self) -> bool {
        match self.last_normalized {
            Some(n) => n <= self.last_crawled,
            None => true,
        }
    }
}

/// Structured fields extracted from an advertisement page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Property {
    pub address: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub postal_code: Option<String>,
    pub price: Option<f64>,
    pub price_raw: Option<String>,
    pub rooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub total_area: Option<f64>,
    pub usable_area: Option<f64>,
    pub property_kind: Option<String>,
    pub source_url: String,
    pub description: Option<String>,
    /// Lower-cased, accent-stripped, deduplicated, sorted.
    pub features: Vec<String>,
    /// Names of fields a field-level extraction failure left empty; does
    /// not fail the whole page.
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

impl Property {
    /// Digest of (normalized-address | normalized-url | price-rounded-2dp).
    /// A changed price yields a new hash by design.
    pub fn content_hash(&self) -> String {
        let addr = self
            .address
            .as_deref()
            .map(normalize_for_hash)
            .unwrap_or_default();
        let url = normalize_for_hash(&self.source_url);
        let price = self
            .price
            .map(|p| format!("{:.2}", p))
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(addr.as_bytes());
        hasher.update(b"|");
        hasher.update(url.as_bytes());
        hasher.update(b"|");
        hasher.update(price.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Predicate that gates Normalizer invocation.
    pub fn is_clean(&self) -> bool {
        let address_ok = self
            .address
            .as_deref()
            .map(|a| !a.contains('\n') && a.trim().chars().count() >= 10)
            .unwrap_or(false);
        let price_ok = self.price.map(|p| p > 0.0).unwrap_or(false);
        let kind_ok = self.property_kind.is_some();
        let rooms_ok =
            self.rooms.is_some() && self.bathrooms.is_some() && self.total_area.is_some();
        address_ok && price_ok && kind_ok && rooms_ok
    }

    /// Quality gate: at least one of {address, price} must be present.
    pub fn passes_quality_gate(&self) -> bool {
        let address_ok = self
            .address
            .as_deref()
            .map(|a| !a.trim().is_empty())
            .unwrap_or(false);
        let price_ok = self.price.map(|p| p > 0.0).unwrap_or(false);
        address_ok || price_ok
    }
}

fn normalize_for_hash(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Digest of a page's extracted content features (prices, addresses,
/// description-block prefixes). Invariant to markup changes and reordering.
pub fn content_fingerprint(
    prices: &[f64],
    addresses: &[String],
    description_blocks: &[String],
    description_prefix_len: usize,
) -> String {
    let mut prices: Vec<String> = prices.iter().map(|p| format!("{:.2}", p)).collect();
    prices.sort();

    let mut addresses: Vec<String> = addresses.iter().map(|a| a.trim().to_lowercase()).collect();
    addresses.sort();

    let mut blocks: Vec<String> = description_blocks
        .iter()
        .map(|b| {
            let trimmed = b.trim();
            let cut = trimmed
                .char_indices()
                .nth(description_prefix_len)
                .map(|(i, _)| i)
                .unwrap_or(trimmed.len());
            trimmed[..cut].to_lowercase()
        })
        .collect();
    blocks.sort();

    let mut hasher = Sha256::new();
    for p in &prices {
        hasher.update(p.as_bytes());
        hasher.update(b"\n");
    }
    for a in &addresses {
        hasher.update(a.as_bytes());
        hasher.update(b"\n");
    }
    for b in &blocks {
        hasher.update(b.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// A unit of work for the Frontier.
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub url: Url,
    pub depth: u32,
    pub source_url: Option<String>,
    pub priority: f64,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_body_size: usize,
    pub follow_redirects: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            follow_redirects: true,
            user_agent: "estatecrawler/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub final_url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub response_time_ms: u64,
}

/// Parsed DOM-derived facts the Classifier and Extractor both need, computed
/// once per fetch. Kept separate from `FetchResponse` so classification is a
/// pure function of the body.
#[derive(Debug, Clone, Default)]
pub struct PageFeatures {
    pub title: Option<String>,
    pub currency_marker_count: usize,
    pub has_rooms_token: bool,
    pub has_bathrooms_token: bool,
    pub has_area_token: bool,
    pub has_pagination: bool,
    pub has_filters: bool,
    pub link_count: usize,
    pub image_count: usize,
    pub visible_text_len: usize,
    pub prices: Vec<f64>,
    pub price_texts: Vec<String>,
    pub addresses: Vec<String>,
    pub description_blocks: Vec<String>,
    pub outbound_links: Vec<String>,
}

/// Result of classifying a page.
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: PageKind,
    pub confidence: f64,
}

/// Fetches a single URL. One production implementation (`HttpFetcher` in
/// `estatecrawler-fetcher`); tests use a map-backed double.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError>;
}

/// Turns an opaque, cleaned `Property` into a normalized one via an external
/// (and, in this crate, never-concrete) LLM vendor. Failures are recoverable:
/// callers fall back to the un-normalized property.
#[async_trait]
pub trait Normalizer: Send + Sync + 'static {
    async fn normalize(&self, property: &Property) -> Result<Property, CrawlError>;
}

/// Per-URL bookkeeping: last-crawled/last-normalized timestamps, content
/// hash, classification outcome. Backs the incremental-skip decision.
#[async_trait]
pub trait FingerprintStore: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<Option<UrlRecord>, CrawlError>;
    async fn upsert(&self, record: &UrlRecord) -> Result<(), CrawlError>;
    async fn stats(&self) -> Result<StoreStats, CrawlError>;
    /// Sweeps records whose `last_crawled` is older than `older_than`.
    /// Returns the number of rows removed. Backs the `--cleanup` CLI flag.
    async fn cleanup_stale(&self, older_than: chrono::Duration) -> Result<u64, CrawlError>;
}

/// Content-addressed property storage: upsert reports whether a row was
/// inserted, updated, or left unchanged (same hash).
#[async_trait]
pub trait DedupStore: Send + Sync + 'static {
    async fn upsert(&self, property: &Property) -> Result<UpsertOutcome, CrawlError>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Property>, CrawlError>;
    async fn clear_all(&self) -> Result<u64, CrawlError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub urls_total: u64,
    pub urls_by_kind: HashMap<String, u64>,
    pub properties_total: u64,
    pub properties_normalized: u64,
    pub origins: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_changes_with_price() {
        let mut p = Property {
            address: Some("Rua X, 123".into()),
            source_url: "https://example.com/a".into(),
            price: Some(450_000.0),
            ..Default::default()
        };
        let h1 = p.content_hash();
        p.price = Some(460_000.0);
        let h2 = p.content_hash();
        assert_ne!(h1, h2);
    }

    #[test]
    fn content_hash_stable_across_calls() {
        let p = Property {
            address: Some("Rua X, 123".into()),
            source_url: "https://example.com/a".into(),
            price: Some(450_000.0),
            ..Default::default()
        };
        assert_eq!(p.content_hash(), p.content_hash());
    }

    #[test]
    fn fingerprint_is_order_insensitive() {
        let h1 = content_fingerprint(
            &[100.0, 200.0],
            &["Rua A".into(), "Rua B".into()],
            &["hello world".into()],
            50,
        );
        let h2 = content_fingerprint(
            &[200.0, 100.0],
            &["Rua B".into(), "Rua A".into()],
            &["hello world".into()],
            50,
        );
        assert_eq!(h1, h2);
    }

    #[test]
    fn quality_gate_requires_address_or_price() {
        let p = Property::default();
        assert!(!p.passes_quality_gate());
        let p = Property {
            price: Some(1.0),
            ..Default::default()
        };
        assert!(p.passes_quality_gate());
    }

    #[test]
    fn well_formed_rejects_normalized_after_crawled() {
        let mut r = UrlRecord::new_unvisited("https://example.com/a");
        r.last_crawled = Utc::now();
        r.last_normalized = Some(r.last_crawled + chrono::Duration::seconds(1));
        assert!(!r.is_well_formed());
    }
}
