use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub scheduler: SchedulerConfig,
    pub fetcher: FetcherConfig,
    pub classifier: ClassifierConfig,
    pub normalizer: NormalizerConfig,
    pub database: DatabaseConfig,
    pub frontier: FrontierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    pub data_dir: String,
    pub max_depth: u32,
    pub max_pages_per_origin: u64,
}

/// Incremental-skip and normalize-TTL policy. `max_age == 0` and
/// `normalize_ttl == 0` together give "full mode" — the same scheduler,
/// tightened to never skip a page or a normalization pass.
///
/// `retry_backoff_*` governs URL-level rescheduling after a fetch exhausts
/// its in-Fetcher retries — a much longer horizon than the Fetcher's own
/// per-request backoff (see `FetcherConfig::retry_base_delay_ms`).
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "default_normalize_ttl_hours")]
    pub normalize_ttl_hours: u64,
    #[serde(default = "default_retry_backoff_base_secs")]
    pub retry_backoff_base_secs: u64,
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
    #[serde(default = "default_retry_backoff_cap_secs")]
    pub retry_backoff_cap_secs: u64,
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
    /// Idle age past which `--cleanup` deletes a URL record outright,
    /// independent of `max_age_hours` (which only governs incremental skip).
    #[serde(default = "default_cleanup_idle_age_hours")]
    pub cleanup_idle_age_hours: u64,
}

fn default_max_age_hours() -> u64 {
    24
}
fn default_normalize_ttl_hours() -> u64 {
    24 * 30
}
fn default_cleanup_idle_age_hours() -> u64 {
    24 * 30
}
fn default_retry_backoff_base_secs() -> u64 {
    3600
}
fn default_retry_backoff_factor() -> f64 {
    2.0
}
fn default_retry_backoff_cap_secs() -> u64 {
    86_400
}
fn default_lease_ttl_seconds() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    #[serde(default = "default_per_host_concurrency")]
    pub per_host_concurrency: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_jitter_pct")]
    pub retry_jitter_pct: f64,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub retry_factor: f64,
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,
}

fn default_per_host_concurrency() -> usize {
    2
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_jitter_pct() -> f64 {
    0.2
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_factor() -> f64 {
    2.0
}
fn default_retry_cap_ms() -> u64 {
    30_000
}
fn default_user_agent() -> String {
    "estatecrawler/0.1".to_string()
}
fn default_max_body_size_mb() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// Tokens that indicate rooms/bedrooms/bathrooms/area on a page, in the
    /// page's expected language(s). Externalized rather than hardcoded.
    #[serde(default = "default_room_tokens")]
    pub room_tokens: Vec<String>,
    #[serde(default = "default_bathroom_tokens")]
    pub bathroom_tokens: Vec<String>,
    #[serde(default = "default_area_tokens")]
    pub area_tokens: Vec<String>,
    #[serde(default = "default_min_visible_text_len")]
    pub min_visible_text_len: usize,
    #[serde(default = "default_catalog_link_threshold")]
    pub catalog_link_threshold: usize,
    #[serde(default = "default_ad_confidence_threshold")]
    pub ad_confidence_threshold: f64,
    #[serde(default = "default_catalog_confidence_threshold")]
    pub catalog_confidence_threshold: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_structure_weight")]
    pub structure_weight: f64,
    #[serde(default = "default_learned_weight")]
    pub learned_weight: f64,
}

fn default_room_tokens() -> Vec<String> {
    vec!["quarto".into(), "quartos".into(), "bedroom".into(), "bedrooms".into()]
}
fn default_bathroom_tokens() -> Vec<String> {
    vec!["banheiro".into(), "banheiros".into(), "bathroom".into(), "bathrooms".into()]
}
fn default_area_tokens() -> Vec<String> {
    vec!["m²".into(), "m2".into(), "sqft".into(), "sq ft".into()]
}
fn default_min_visible_text_len() -> usize {
    200
}
fn default_catalog_link_threshold() -> usize {
    15
}
fn default_ad_confidence_threshold() -> f64 {
    0.6
}
fn default_catalog_confidence_threshold() -> f64 {
    0.5
}
fn default_keyword_weight() -> f64 {
    0.4
}
fn default_structure_weight() -> f64 {
    0.35
}
fn default_learned_weight() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_normalizer_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
    #[serde(default = "default_normalizer_batch_size")]
    pub batch_size: usize,
}

fn default_normalizer_cache_ttl_hours() -> u64 {
    24
}
fn default_normalizer_batch_size() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub postgres_url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct FrontierConfig {
    #[serde(default = "default_bloom_size")]
    pub bloom_filter_size: usize,
    #[serde(default = "default_bloom_fp")]
    pub bloom_filter_fp_rate: f64,
    #[serde(default = "default_worker_pool_size")]
    pub default_worker_pool_size: usize,
    #[serde(default = "default_per_origin_concurrency")]
    pub per_origin_concurrency: usize,
    /// Whether catalog-page link discovery follows links to other origins.
    /// Default false: stay on the origin the catalog page was fetched from.
    #[serde(default)]
    pub allow_cross_origin_catalog_links: bool,
}

fn default_bloom_size() -> usize {
    1_000_000
}
fn default_bloom_fp() -> f64 {
    0.001
}
fn default_worker_pool_size() -> usize {
    6
}
fn default_per_origin_concurrency() -> usize {
    2
}
