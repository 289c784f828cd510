//! Decision engine: per-URL state machine, worker pool, leases, statistics.
//! Implements the public entry points an external API layer calls into:
//! `trigger_crawl`, `search_properties`, `statistics`, `learn_patterns`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use estatecrawler_classifier::{Classifier, LabeledUrl, PatternLibrary};
use estatecrawler_core::{
    AppConfig, CrawlError, CrawlJob, DedupStore, FetchConfig, Fetcher, Normalizer, PageKind,
    Property, StoreStats, UpsertOutcome, UrlRecord, UrlStatus,
};
use estatecrawler_frontier::CrawlFrontier;
use estatecrawler_parser::{extract_page_features, Extractor};

/// Process-wide counters, mirroring the statistics spec.md §4.7 requires.
#[derive(Default)]
pub struct Statistics {
    pub urls_visited: AtomicU64,
    pub advertisements_found: AtomicU64,
    pub advertisements_stored: AtomicU64,
    pub catalogs_seen: AtomicU64,
    pub extractor_failures: AtomicU64,
    pub normalizations_invoked: AtomicU64,
    pub normalizations_skipped: AtomicU64,
    pub normalizer_failures: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub skip_saved: AtomicU64,
    pub total_latency_ms: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatisticsSnapshot {
    pub urls_visited: u64,
    pub advertisements_found: u64,
    pub advertisements_stored: u64,
    pub catalogs_seen: u64,
    pub extractor_failures: u64,
    pub normalizations_invoked: u64,
    pub normalizations_skipped: u64,
    pub normalizer_failures: u64,
    pub fetch_failures: u64,
    pub skip_saved: u64,
    pub average_latency_ms: f64,
    pub store: StoreStats,
}

impl Statistics {
    fn record_latency(&self, elapsed: Duration) {
        self.urls_visited.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self, store: StoreStats) -> StatisticsSnapshot {
        let visited = self.urls_visited.load(Ordering::Relaxed);
        let total_ms = self.total_latency_ms.load(Ordering::Relaxed);
        StatisticsSnapshot {
            urls_visited: visited,
            advertisements_found: self.advertisements_found.load(Ordering::Relaxed),
            advertisements_stored: self.advertisements_stored.load(Ordering::Relaxed),
            catalogs_seen: self.catalogs_seen.load(Ordering::Relaxed),
            extractor_failures: self.extractor_failures.load(Ordering::Relaxed),
            normalizations_invoked: self.normalizations_invoked.load(Ordering::Relaxed),
            normalizations_skipped: self.normalizations_skipped.load(Ordering::Relaxed),
            normalizer_failures: self.normalizer_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            skip_saved: self.skip_saved.load(Ordering::Relaxed),
            average_latency_ms: if visited == 0 {
                0.0
            } else {
                total_ms as f64 / visited as f64
            },
            store,
        }
    }
}

/// Mode preset: full re-derives `max_age`/`normalize_ttl` to zero so every
/// URL is re-fetched and re-normalized, per spec.md §9 ("two engines unified
/// as one scheduler with two configuration presets").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    Full,
    Incremental,
}

/// Everything the Scheduler needs injected as an explicit capability set —
/// no singletons, no ambient global state beyond the lease/stats maps that
/// are owned by this struct's own instance.
pub struct Scheduler {
    pub frontier: Arc<CrawlFrontier>,
    pub fingerprint_store: Arc<dyn estatecrawler_core::FingerprintStore>,
    pub dedup_store: Arc<dyn DedupStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub classifier: Arc<Classifier>,
    pub extractor: Arc<Extractor>,
    pub normalizer: Option<Arc<dyn Normalizer>>,
    pub config: AppConfig,
    pub stats: Arc<Statistics>,
    leases: DashMap<String, (String, Instant)>,
    /// URLs that failed a fetch and are backing off — not eligible for
    /// `next_job` again until the deadline passes. Keyed by URL, not by the
    /// Frontier's priority queue, since the Frontier itself has no notion of
    /// time-gated scheduling.
    retry_after: DashMap<String, Instant>,
    mode: CrawlMode,
    /// When false, the unchanged-content-hash shortcut never applies: every
    /// advertisement is re-extracted regardless of `content_hash`. Backs
    /// `--enable-fingerprinting=false`.
    enable_fingerprinting: bool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frontier: Arc<CrawlFrontier>,
        fingerprint_store: Arc<dyn estatecrawler_core::FingerprintStore>,
        dedup_store: Arc<dyn DedupStore>,
        fetcher: Arc<dyn Fetcher>,
        classifier: Arc<Classifier>,
        extractor: Arc<Extractor>,
        normalizer: Option<Arc<dyn Normalizer>>,
        config: AppConfig,
        mode: CrawlMode,
    ) -> Self {
        Self::with_fingerprinting(
            frontier,
            fingerprint_store,
            dedup_store,
            fetcher,
            classifier,
            extractor,
            normalizer,
            config,
            mode,
            true,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_fingerprinting(
        frontier: Arc<CrawlFrontier>,
        fingerprint_store: Arc<dyn estatecrawler_core::FingerprintStore>,
        dedup_store: Arc<dyn DedupStore>,
        fetcher: Arc<dyn Fetcher>,
        classifier: Arc<Classifier>,
        extractor: Arc<Extractor>,
        normalizer: Option<Arc<dyn Normalizer>>,
        config: AppConfig,
        mode: CrawlMode,
        enable_fingerprinting: bool,
    ) -> Self {
        Self {
            frontier,
            fingerprint_store,
            dedup_store,
            fetcher,
            classifier,
            extractor,
            normalizer,
            config,
            stats: Arc::new(Statistics::default()),
            leases: DashMap::new(),
            retry_after: DashMap::new(),
            mode,
            enable_fingerprinting,
        }
    }

    fn max_age(&self) -> chrono::Duration {
        match self.mode {
            CrawlMode::Full => chrono::Duration::zero(),
            CrawlMode::Incremental => {
                chrono::Duration::hours(self.config.scheduler.max_age_hours as i64)
            }
        }
    }

    fn normalize_ttl(&self) -> chrono::Duration {
        match self.mode {
            CrawlMode::Full => chrono::Duration::zero(),
            CrawlMode::Incremental => {
                chrono::Duration::hours(self.config.scheduler.normalize_ttl_hours as i64)
            }
        }
    }

    fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.config.scheduler.lease_ttl_seconds)
    }

    /// Whether a URL's retry backoff (set by `handle_fetch_failure`) has
    /// elapsed. Clears the entry once it has, so the map doesn't grow
    /// unbounded with stale deadlines.
    fn ready_for_retry(&self, url: &str) -> bool {
        match self.retry_after.get(url) {
            Some(deadline) if Instant::now() < *deadline => false,
            Some(_) => {
                self.retry_after.remove(url);
                true
            }
            None => true,
        }
    }

    /// Tries to take the in-progress lease for a URL. Fails if another
    /// worker holds a non-expired lease — the per-URL mutual-exclusion
    /// invariant from spec.md §8.
    fn acquire_lease(&self, url: &str, worker_id: &str) -> bool {
        let now = Instant::now();
        match self.leases.get(url) {
            Some(existing) if now.duration_since(existing.1) < self.lease_ttl() => false,
            _ => {
                self.leases
                    .insert(url.to_string(), (worker_id.to_string(), now));
                true
            }
        }
    }

    fn release_lease(&self, url: &str) {
        self.leases.remove(url);
    }

    fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.config.fetcher.timeout_seconds),
            max_body_size: self.config.fetcher.max_body_size_mb * 1024 * 1024,
            follow_redirects: true,
            user_agent: self.config.fetcher.user_agent.clone(),
        }
    }

    fn same_origin(&self, base: &Url, candidate: &Url) -> bool {
        self.config.frontier.allow_cross_origin_catalog_links || base.host_str() == candidate.host_str()
    }

    /// Runs a worker pool of `pool_size` symmetric workers over the
    /// Frontier until `shutdown` fires or the Frontier drains completely.
    pub async fn trigger_crawl(
        self: Arc<Self>,
        pool_size: usize,
        shutdown_tx: broadcast::Sender<()>,
    ) -> anyhow::Result<()> {
        let mut handles = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            let scheduler = Arc::clone(&self);
            let mut shutdown = shutdown_tx.subscribe();
            let worker_name = format!("worker-{worker_id}");
            handles.push(tokio::spawn(async move {
                let mut idle_rounds = 0u32;
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => {
                            info!(worker = %worker_name, "worker shutting down");
                            break;
                        }
                        job = scheduler.next_job(&worker_name) => {
                            match job {
                                Some(job) => {
                                    idle_rounds = 0;
                                    let origin = job.url.host_str().unwrap_or("").to_string();
                                    let url_str = job.url.to_string();
                                    scheduler.process_job(job).await;
                                    scheduler.release_lease(&url_str);
                                    scheduler.frontier.release_origin_slot(&origin);
                                }
                                None => {
                                    idle_rounds += 1;
                                    if scheduler.frontier.is_empty().await && idle_rounds > 3 {
                                        break;
                                    }
                                    tokio::time::sleep(Duration::from_millis(200)).await;
                                }
                            }
                        }
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Round-robins over known origins looking for a job whose origin slot
    /// is free and whose lease can be acquired.
    async fn next_job(&self, worker_id: &str) -> Option<CrawlJob> {
        for origin in self.frontier.known_origins() {
            if !self.frontier.try_acquire_origin_slot(&origin) {
                continue;
            }
            let Some(job) = self.frontier.pop_for_origin(&origin).await else {
                self.frontier.release_origin_slot(&origin);
                continue;
            };
            if !self.ready_for_retry(job.url.as_str()) {
                self.frontier.push_back(&origin, vec![job]).await;
                self.frontier.release_origin_slot(&origin);
                continue;
            }
            if self.acquire_lease(job.url.as_str(), worker_id) {
                return Some(job);
            }
            // Someone else holds the lease (shouldn't happen under the
            // single-pop-per-URL frontier, but stay defensive); requeue.
            self.frontier.push_back(&origin, vec![job]).await;
            self.frontier.release_origin_slot(&origin);
        }
        None
    }

    async fn process_job(&self, job: CrawlJob) {
        let start = Instant::now();
        let url = job.url.clone();
        let url_str = url.to_string();
        let origin = url.host_str().unwrap_or("").to_string();

        let existing = match self.fingerprint_store.get(&url_str).await {
            Ok(record) => record,
            Err(e) => {
                warn!(url = %url_str, error = %e, "fingerprint store unavailable, falling back to always-fetch");
                None
            }
        };

        if let Some(record) = &existing {
            let now = Utc::now();
            if record.last_status == UrlStatus::Success
                && now - record.last_crawled < self.max_age()
            {
                self.stats.skip_saved.fetch_add(1, Ordering::Relaxed);
                self.stats.record_latency(start.elapsed());
                debug!(url = %url_str, "skip: within max_age");
                return;
            }
        }

        let fetch_config = self.fetch_config();
        let response = match self.fetcher.fetch(&url, &fetch_config).await {
            Ok(resp) => resp,
            Err(e) => {
                self.handle_fetch_failure(&job, &url_str, &origin, e).await;
                self.stats.record_latency(start.elapsed());
                return;
            }
        };

        let html_str = String::from_utf8_lossy(&response.body).to_string();
        let features = extract_page_features(
            &html_str,
            &url,
            &self.config.classifier.room_tokens,
            &self.config.classifier.bathroom_tokens,
            &self.config.classifier.area_tokens,
        );
        let classification = self.classifier.classify(&url, &features);

        match classification.kind {
            PageKind::Other => {
                self.store_visit(&url_str, &origin, PageKind::Other, classification.confidence, String::new(), UrlStatus::Success, 0, None).await;
            }
            PageKind::Catalog => {
                self.stats.catalogs_seen.fetch_add(1, Ordering::Relaxed);
                self.discover_links(&url, &features, job.depth).await;
                self.store_visit(&url_str, &origin, PageKind::Catalog, classification.confidence, String::new(), UrlStatus::Success, 0, None).await;
            }
            PageKind::Advertisement => {
                self.stats.advertisements_found.fetch_add(1, Ordering::Relaxed);
                self.process_advertisement(&url, &url_str, &origin, &html_str, &existing, classification.confidence).await;
            }
            PageKind::Unknown => unreachable!("classifier never returns Unknown"),
        }

        self.stats.record_latency(start.elapsed());
    }

    async fn handle_fetch_failure(&self, job: &CrawlJob, url_str: &str, origin: &str, error: CrawlError) {
        self.stats.fetch_failures.fetch_add(1, Ordering::Relaxed);
        warn!(url = %url_str, error = %error, "fetch failed");

        if !error.is_permanent() {
            let backoff = self.retry_backoff(job.retry_count);
            let retry_job = CrawlJob {
                url: job.url.clone(),
                depth: job.depth,
                source_url: job.source_url.clone(),
                priority: job.priority * 0.5,
                retry_count: job.retry_count + 1,
            };
            self.retry_after
                .insert(url_str.to_string(), Instant::now() + backoff);
            debug!(url = %url_str, backoff_secs = backoff.as_secs(), "scheduling retry");
            self.frontier.push_back(origin, vec![retry_job]).await;
        }

        self.store_visit(
            url_str,
            origin,
            PageKind::Unknown,
            0.0,
            String::new(),
            UrlStatus::Failed,
            0,
            Some(error.to_string()),
        )
        .await;
    }

    fn retry_backoff(&self, retry_count: u32) -> Duration {
        let base = self.config.scheduler.retry_backoff_base_secs as f64;
        let factor = self.config.scheduler.retry_backoff_factor;
        let cap = self.config.scheduler.retry_backoff_cap_secs as f64;
        Duration::from_secs((base * factor.powi(retry_count as i32)).min(cap) as u64)
    }

    async fn discover_links(&self, catalog_url: &Url, features: &estatecrawler_core::PageFeatures, depth: u32) {
        if depth >= self.config.general.max_depth {
            return;
        }
        let mut jobs = Vec::new();
        for link in &features.outbound_links {
            let Ok(resolved) = catalog_url.join(link) else {
                continue;
            };
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            if !self.same_origin(catalog_url, &resolved) {
                continue;
            }
            jobs.push(CrawlJob {
                url: resolved,
                depth: depth + 1,
                source_url: Some(catalog_url.to_string()),
                priority: 1.0 / (depth as f64 + 2.0),
                retry_count: 0,
            });
        }
        if !jobs.is_empty() {
            let enqueued = self.frontier.push_batch(jobs).await;
            if enqueued > 0 {
                debug!(url = %catalog_url, enqueued, "catalog links enqueued");
            }
        }
    }

    async fn process_advertisement(
        &self,
        url: &Url,
        url_str: &str,
        origin: &str,
        html_str: &str,
        existing: &Option<UrlRecord>,
        confidence: f64,
    ) {
        let content_hash = self.extractor.fingerprint(url, html_str);
        let unchanged = self.enable_fingerprinting
            && existing
                .as_ref()
                .map(|r| r.content_hash == content_hash && !r.content_hash.is_empty())
                .unwrap_or(false);
        let normalized_fresh = existing
            .as_ref()
            .and_then(|r| r.last_normalized)
            .map(|ts| Utc::now() - ts < self.normalize_ttl())
            .unwrap_or(false);

        if unchanged && normalized_fresh {
            debug!(url = %url_str, "advertisement unchanged, skipping extract+normalize");
            let mut record = existing.clone().unwrap();
            record.last_crawled = Utc::now();
            record.confidence = confidence;
            if let Err(e) = self.fingerprint_store.upsert(&record).await {
                warn!(url = %url_str, error = %e, "fingerprint upsert failed");
            }
            return;
        }

        let property = match self.extractor.extract(url, html_str) {
            Ok(p) => p,
            Err(e) => {
                self.stats.extractor_failures.fetch_add(1, Ordering::Relaxed);
                self.store_visit(url_str, origin, PageKind::Advertisement, confidence, content_hash, UrlStatus::Failed, 0, Some(e.to_string())).await;
                return;
            }
        };

        let (property, normalized_now) = self.maybe_normalize(&property, existing, &content_hash).await;

        let outcome = match self.dedup_store.upsert(&property).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(url = %url_str, error = %e, "dedup store upsert failed");
                self.store_visit(url_str, origin, PageKind::Advertisement, confidence, content_hash, UrlStatus::Failed, 0, Some(e.to_string())).await;
                return;
            }
        };
        if matches!(outcome, UpsertOutcome::Inserted | UpsertOutcome::Updated) {
            self.stats.advertisements_stored.fetch_add(1, Ordering::Relaxed);
        }

        let mut record = UrlRecord::new_unvisited(url_str);
        record.origin = origin.to_string();
        record.content_hash = content_hash;
        record.last_crawled = Utc::now();
        record.last_normalized = if normalized_now { Some(Utc::now()) } else { existing.as_ref().and_then(|r| r.last_normalized) };
        record.last_status = UrlStatus::Success;
        record.property_count = 1;
        record.page_kind = PageKind::Advertisement;
        record.confidence = confidence;
        record.error_text = None;

        if let Err(e) = self.fingerprint_store.upsert(&record).await {
            warn!(url = %url_str, error = %e, "fingerprint upsert failed");
        }
    }

    /// Applies the Normalizer gating rules from spec.md §4.6. Returns the
    /// (possibly normalized) property and whether normalization actually ran.
    async fn maybe_normalize(
        &self,
        property: &Property,
        existing: &Option<UrlRecord>,
        new_hash: &str,
    ) -> (Property, bool) {
        let Some(normalizer) = &self.normalizer else {
            return (property.clone(), false);
        };
        if !self.config.normalizer.enabled {
            return (property.clone(), false);
        }

        let unchanged = self.enable_fingerprinting
            && existing
                .as_ref()
                .map(|r| r.content_hash == new_hash && !r.content_hash.is_empty())
                .unwrap_or(false);
        let ttl_fresh = existing
            .as_ref()
            .and_then(|r| r.last_normalized)
            .map(|ts| Utc::now() - ts < self.normalize_ttl())
            .unwrap_or(false);
        if unchanged && ttl_fresh {
            self.stats.normalizations_skipped.fetch_add(1, Ordering::Relaxed);
            return (property.clone(), false);
        }
        if property.is_clean() {
            self.stats.normalizations_skipped.fetch_add(1, Ordering::Relaxed);
            return (property.clone(), false);
        }

        self.stats.normalizations_invoked.fetch_add(1, Ordering::Relaxed);
        match normalizer.normalize(property).await {
            Ok(normalized) => (normalized, true),
            Err(e) => {
                self.stats.normalizer_failures.fetch_add(1, Ordering::Relaxed);
                warn!(url = %property.source_url, error = %e, "normalizer unavailable, storing raw record");
                (property.clone(), false)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_visit(
        &self,
        url: &str,
        origin: &str,
        kind: PageKind,
        confidence: f64,
        content_hash: String,
        status: UrlStatus,
        property_count: u64,
        error_text: Option<String>,
    ) {
        let mut record = UrlRecord::new_unvisited(url);
        record.origin = origin.to_string();
        record.content_hash = content_hash;
        record.last_crawled = Utc::now();
        record.last_status = status;
        record.property_count = property_count;
        record.page_kind = kind;
        record.confidence = confidence;
        record.error_text = error_text;
        if let Err(e) = self.fingerprint_store.upsert(&record).await {
            warn!(url, error = %e, "fingerprint upsert failed");
        }
    }
}

/// `SearchProperties(filter, pagination)` from spec.md §6. `filter` is a
/// free-text query; ranking and weighting are the DedupStore's concern.
pub async fn search_properties(
    scheduler: &Scheduler,
    query: &str,
    limit: usize,
) -> Result<Vec<Property>, CrawlError> {
    scheduler.dedup_store.search(query, limit).await
}

/// `Statistics()` from spec.md §6: scheduler counters plus FingerprintStore
/// aggregates.
pub async fn statistics(scheduler: &Scheduler) -> Result<StatisticsSnapshot, CrawlError> {
    let store = scheduler.fingerprint_store.stats().await?;
    Ok(scheduler.stats.snapshot(store))
}

/// `LearnPatterns({urls, label})` from spec.md §6: appends training
/// examples and atomically replaces the learned-pattern snapshot.
pub fn learn_patterns(scheduler: &Scheduler, examples: Vec<LabeledUrl>) {
    scheduler.classifier.train(&examples);
}

pub fn pattern_library_handle(scheduler: &Scheduler) -> Arc<arc_swap::ArcSwap<PatternLibrary>> {
    scheduler.classifier.patterns_handle()
}

/// `TriggerCrawl(cities?, mode)` entry point used by the (external) API
/// layer: seeds the Frontier if seeds are given, then runs workers to
/// completion or cancellation. Idempotent while a run is already active is
/// the caller's responsibility (single-process scheduler, spec.md §1).
pub async fn trigger_crawl(
    scheduler: Arc<Scheduler>,
    seed_urls: Vec<String>,
    pool_size: usize,
    shutdown_tx: broadcast::Sender<()>,
) -> anyhow::Result<()> {
    if !seed_urls.is_empty() {
        let added = scheduler.frontier.add_seeds(&seed_urls).await;
        info!(added, "seeds enqueued");
    }
    scheduler.trigger_crawl(pool_size, shutdown_tx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use estatecrawler_core::config::{
        ClassifierConfig, DatabaseConfig, FetcherConfig, FrontierConfig, GeneralConfig,
        NormalizerConfig, SchedulerConfig,
    };
    use estatecrawler_core::testing::{InMemoryDedupStore, InMemoryFingerprintStore};
    use estatecrawler_core::FetchResponse;
    use std::collections::HashMap;

    fn test_config() -> AppConfig {
        AppConfig {
            general: GeneralConfig {
                data_dir: "/tmp".into(),
                max_depth: 10,
                max_pages_per_origin: 1000,
            },
            scheduler: SchedulerConfig {
                max_age_hours: 24,
                normalize_ttl_hours: 720,
                retry_backoff_base_secs: 1,
                retry_backoff_factor: 2.0,
                retry_backoff_cap_secs: 10,
                lease_ttl_seconds: 120,
                cleanup_idle_age_hours: 720,
            },
            fetcher: FetcherConfig {
                per_host_concurrency: 2,
                timeout_seconds: 30,
                retry_max_attempts: 3,
                retry_jitter_pct: 0.2,
                retry_base_delay_ms: 500,
                retry_factor: 2.0,
                retry_cap_ms: 30_000,
                user_agent: "test/0.1".into(),
                max_body_size_mb: 10,
            },
            classifier: ClassifierConfig {
                room_tokens: vec!["quarto".into()],
                bathroom_tokens: vec!["banheiro".into()],
                area_tokens: vec!["m²".into()],
                min_visible_text_len: 10,
                catalog_link_threshold: 15,
                ad_confidence_threshold: 0.6,
                catalog_confidence_threshold: 0.5,
                keyword_weight: 0.4,
                structure_weight: 0.35,
                learned_weight: 0.25,
            },
            normalizer: NormalizerConfig {
                enabled: false,
                cache_ttl_hours: 24,
                batch_size: 5,
            },
            database: DatabaseConfig {
                postgres_url: "postgres://localhost/test".into(),
                pool_size: 5,
            },
            frontier: FrontierConfig {
                bloom_filter_size: 1000,
                bloom_filter_fp_rate: 0.01,
                default_worker_pool_size: 2,
                per_origin_concurrency: 2,
                allow_cross_origin_catalog_links: false,
            },
        }
    }

    struct StubFetcher {
        body: String,
    }

    #[async_trait::async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, url: &Url, _config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
            Ok(FetchResponse {
                url: url.clone(),
                final_url: url.clone(),
                status: 200,
                headers: HashMap::new(),
                body: self.body.clone().into_bytes(),
                content_type: Some("text/html".into()),
                fetched_at: Utc::now(),
                response_time_ms: 1,
            })
        }
    }

    fn sample_ad_html() -> String {
        r#"<html><body>
            <h1 itemprop="address">Rua das Flores, 123</h1>
            <span class="price">R$ 450.000</span>
            <span class="rooms">3 quartos</span>
            <span class="bathrooms">2 banheiro</span>
            <span class="total-area">80 m²</span>
            <p class="property-description">Apartamento reformado perto do metro, otima localizacao e muito espaco.</p>
        </body></html>"#.to_string()
    }

    fn build_scheduler(body: String) -> Arc<Scheduler> {
        let config = test_config();
        let frontier = Arc::new(CrawlFrontier::new(config.frontier.per_origin_concurrency));
        let fingerprint_store = Arc::new(InMemoryFingerprintStore::default());
        let dedup_store = Arc::new(InMemoryDedupStore::default());
        let fetcher = Arc::new(StubFetcher { body });
        let classifier = Arc::new(Classifier::new(config.classifier.clone()));
        let extractor = Arc::new(Extractor::default());
        Arc::new(Scheduler::new(
            frontier,
            fingerprint_store,
            dedup_store,
            fetcher,
            classifier,
            extractor,
            None,
            config,
            CrawlMode::Incremental,
        ))
    }

    #[tokio::test]
    async fn cold_start_single_advertisement_page_is_stored() {
        let scheduler = build_scheduler(sample_ad_html());
        let job = CrawlJob {
            url: Url::parse("https://example.com/imovel/1").unwrap(),
            depth: 0,
            source_url: None,
            priority: 1.0,
            retry_count: 0,
        };
        scheduler.process_job(job).await;

        let results = scheduler.dedup_store.search("Flores", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].price, Some(450_000.0));
        assert_eq!(results[0].rooms, Some(3));

        let record = scheduler
            .fingerprint_store
            .get("https://example.com/imovel/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.page_kind, PageKind::Advertisement);
        assert!(!record.content_hash.is_empty());
    }

    #[tokio::test]
    async fn recrawl_unchanged_page_skips_extract_and_leaves_property_set_unchanged() {
        let scheduler = build_scheduler(sample_ad_html());
        let job = || CrawlJob {
            url: Url::parse("https://example.com/imovel/1").unwrap(),
            depth: 0,
            source_url: None,
            priority: 1.0,
            retry_count: 0,
        };
        scheduler.process_job(job()).await;
        let before = scheduler.stats.extractor_failures.load(Ordering::Relaxed);

        scheduler.process_job(job()).await;

        let results = scheduler.dedup_store.search("Flores", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            before,
            scheduler.stats.extractor_failures.load(Ordering::Relaxed)
        );
    }

    struct CountingNormalizer {
        calls: std::sync::atomic::AtomicU64,
    }

    #[async_trait::async_trait]
    impl Normalizer for CountingNormalizer {
        async fn normalize(&self, property: &Property) -> Result<Property, CrawlError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(property.clone())
        }
    }

    #[tokio::test]
    async fn disabling_fingerprinting_forces_renormalization_of_unchanged_pages() {
        let mut config = test_config();
        config.normalizer.enabled = true;
        let frontier = Arc::new(CrawlFrontier::new(config.frontier.per_origin_concurrency));
        let normalizer = Arc::new(CountingNormalizer {
            calls: std::sync::atomic::AtomicU64::new(0),
        });
        let scheduler = Arc::new(Scheduler::with_fingerprinting(
            frontier,
            Arc::new(InMemoryFingerprintStore::default()),
            Arc::new(InMemoryDedupStore::default()),
            Arc::new(StubFetcher { body: sample_ad_html() }),
            Arc::new(Classifier::new(config.classifier.clone())),
            Arc::new(Extractor::default()),
            Some(normalizer.clone()),
            config,
            CrawlMode::Incremental,
            false,
        ));
        let job = || CrawlJob {
            url: Url::parse("https://example.com/imovel/1").unwrap(),
            depth: 0,
            source_url: None,
            priority: 1.0,
            retry_count: 0,
        };
        scheduler.process_job(job()).await;
        scheduler.process_job(job()).await;

        assert_eq!(normalizer.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn catalog_page_pushes_links_without_creating_property() {
        let catalog_html = r#"<html><body>
            <div class="pagination">Page 1 of 10</div>
            <div class="filters"><select></select></div>
            $1.000 $2.000 $3.000 $4.000 $5.000 $6.000
            <a href="/imovel/1">1</a><a href="/imovel/2">2</a><a href="/imovel/3">3</a>
            <a href="/imovel/4">4</a><a href="/imovel/5">5</a><a href="/imovel/6">6</a>
            <a href="/imovel/7">7</a><a href="/imovel/8">8</a><a href="/imovel/9">9</a>
            <a href="/imovel/10">10</a><a href="/imovel/11">11</a><a href="/imovel/12">12</a>
            <a href="/imovel/13">13</a><a href="/imovel/14">14</a><a href="/imovel/15">15</a>
            <a href="/imovel/16">16</a><a href="/imovel/17">17</a><a href="/imovel/18">18</a>
            <a href="/imovel/19">19</a><a href="/imovel/20">20</a>
        </body></html>"#;
        let scheduler = build_scheduler(catalog_html.to_string());
        let job = CrawlJob {
            url: Url::parse("https://example.com/busca").unwrap(),
            depth: 0,
            source_url: None,
            priority: 1.0,
            retry_count: 0,
        };
        scheduler.process_job(job).await;

        let results = scheduler.dedup_store.search("a", 10).await.unwrap();
        assert!(results.is_empty());
        assert!(scheduler.frontier.origin_len("example.com").await > 0);
    }

    struct FailingFetcher;

    #[async_trait::async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, _url: &Url, _config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
            Err(CrawlError::Transport("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn failed_fetch_is_not_retried_until_backoff_elapses() {
        let config = test_config();
        let frontier = Arc::new(CrawlFrontier::new(config.frontier.per_origin_concurrency));
        let scheduler = Arc::new(Scheduler::new(
            frontier,
            Arc::new(InMemoryFingerprintStore::default()),
            Arc::new(InMemoryDedupStore::default()),
            Arc::new(FailingFetcher),
            Arc::new(Classifier::new(config.classifier.clone())),
            Arc::new(Extractor::default()),
            None,
            config,
            CrawlMode::Incremental,
        ));
        let job = CrawlJob {
            url: Url::parse("https://example.com/imovel/1").unwrap(),
            depth: 0,
            source_url: None,
            priority: 1.0,
            retry_count: 0,
        };
        scheduler.process_job(job).await;
        assert_eq!(scheduler.frontier.origin_len("example.com").await, 1);

        assert!(scheduler.next_job("w1").await.is_none());
        assert_eq!(scheduler.frontier.origin_len("example.com").await, 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let retried = scheduler.next_job("w1").await;
        assert!(retried.is_some());
        assert_eq!(retried.unwrap().retry_count, 1);
    }

    #[test]
    fn retry_backoff_grows_and_caps() {
        let scheduler_config = test_config();
        let frontier = Arc::new(CrawlFrontier::new(2));
        let scheduler = Scheduler::new(
            frontier,
            Arc::new(InMemoryFingerprintStore::default()),
            Arc::new(InMemoryDedupStore::default()),
            Arc::new(StubFetcher { body: String::new() }),
            Arc::new(Classifier::new(scheduler_config.classifier.clone())),
            Arc::new(Extractor::default()),
            None,
            scheduler_config,
            CrawlMode::Incremental,
        );
        let d0 = scheduler.retry_backoff(0);
        let d5 = scheduler.retry_backoff(5);
        assert!(d5 >= d0);
        assert!(d5.as_secs() <= scheduler.config.scheduler.retry_backoff_cap_secs);
    }
}
