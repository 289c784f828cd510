use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use growable_bloom_filter::GrowableBloom;
use priority_queue::PriorityQueue;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use estatecrawler_core::CrawlJob;

/// Wrapper for priority ordering (higher priority = dequeued first).
#[derive(Debug, Clone)]
struct Priority(f64);

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct UrlKey(String);

/// Per-origin priority queue with its own job storage.
struct OriginQueue {
    queue: PriorityQueue<UrlKey, Priority>,
    jobs: HashMap<String, CrawlJob>,
}

impl OriginQueue {
    fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            jobs: HashMap::new(),
        }
    }

    fn push(&mut self, normalized: String, job: CrawlJob) {
        let priority = Priority(job.priority);
        let key = UrlKey(normalized.clone());
        self.jobs.insert(normalized, job);
        self.queue.push(key, priority);
    }

    fn pop(&mut self) -> Option<CrawlJob> {
        let (key, _priority) = self.queue.pop()?;
        self.jobs.remove(&key.0)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Per-origin priority queues, in-session URL dedup, and the per-origin
/// in-flight cap that keeps any one host from monopolizing the worker pool.
pub struct CrawlFrontier {
    origins: DashMap<String, Arc<Mutex<OriginQueue>>>,
    seen_urls: Arc<Mutex<GrowableBloom>>,
    host_last_seen: DashMap<String, Instant>,
    in_flight: DashMap<String, Arc<AtomicUsize>>,
    per_origin_concurrency: usize,
}

impl CrawlFrontier {
    pub fn new(per_origin_concurrency: usize) -> Self {
        Self::with_bloom_params(per_origin_concurrency, 0.001, 100_000)
    }

    /// Same as `new`, with the seen-set bloom filter's target false-positive
    /// rate and initial capacity taken from `FrontierConfig` instead of the
    /// test-friendly defaults.
    pub fn with_bloom_params(
        per_origin_concurrency: usize,
        fp_rate: f64,
        initial_capacity: usize,
    ) -> Self {
        let bloom = GrowableBloom::new(fp_rate, initial_capacity);
        Self {
            origins: DashMap::new(),
            seen_urls: Arc::new(Mutex::new(bloom)),
            host_last_seen: DashMap::new(),
            in_flight: DashMap::new(),
            per_origin_concurrency,
        }
    }

    /// Mark URLs as already seen (loaded from the store at startup). Does
    /// not enqueue them.
    pub async fn mark_seen_batch(&self, urls: &[String]) {
        let mut bloom = self.seen_urls.lock().await;
        for url_str in urls {
            if let Ok(url) = Url::parse(url_str) {
                bloom.insert(&Self::normalize_url(&url));
            } else {
                bloom.insert(url_str.to_lowercase());
            }
        }
    }

    /// Lowercase host, strip fragment, strip trailing slash.
    fn normalize_url(url: &Url) -> String {
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        let path = normalized.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            normalized.set_path(&path[..path.len() - 1]);
        }
        normalized.to_string().to_lowercase()
    }

    fn origin_of(url: &Url) -> String {
        url.host_str().unwrap_or("").to_string()
    }

    fn get_origin_queue(&self, origin: &str) -> Arc<Mutex<OriginQueue>> {
        self.origins
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(OriginQueue::new())))
            .clone()
    }

    /// Adds a URL to the frontier. Returns `true` if added, `false` if
    /// already seen (retries bypass the dedup check).
    pub async fn push(&self, job: CrawlJob) -> bool {
        let normalized = Self::normalize_url(&job.url);
        let is_retry = job.retry_count > 0;
        let origin = Self::origin_of(&job.url);

        if !is_retry {
            let mut bloom = self.seen_urls.lock().await;
            if bloom.contains(&normalized) {
                return false;
            }
            bloom.insert(&normalized);
        }

        let oq = self.get_origin_queue(&origin);
        let mut queue = oq.lock().await;
        queue.push(normalized, job);
        true
    }

    /// Adds multiple jobs in one batch. Returns the number actually
    /// enqueued after dedup.
    pub async fn push_batch(&self, jobs: Vec<CrawlJob>) -> usize {
        if jobs.is_empty() {
            return 0;
        }

        let (retries, fresh): (Vec<_>, Vec<_>) = jobs.into_iter().partition(|j| j.retry_count > 0);

        let mut to_enqueue = retries;
        if !fresh.is_empty() {
            let mut bloom = self.seen_urls.lock().await;
            for job in fresh {
                let normalized = Self::normalize_url(&job.url);
                if !bloom.contains(&normalized) {
                    bloom.insert(&normalized);
                    to_enqueue.push(job);
                }
            }
        }

        let mut by_origin: HashMap<String, Vec<(String, CrawlJob)>> = HashMap::new();
        for job in to_enqueue {
            let normalized = Self::normalize_url(&job.url);
            by_origin
                .entry(Self::origin_of(&job.url))
                .or_default()
                .push((normalized, job));
        }

        let mut added = 0;
        for (origin, jobs) in by_origin {
            let oq = self.get_origin_queue(&origin);
            let mut queue = oq.lock().await;
            for (normalized, job) in jobs {
                queue.push(normalized, job);
                added += 1;
            }
        }
        added
    }

    pub async fn pop_for_origin(&self, origin: &str) -> Option<CrawlJob> {
        let oq = self.origins.get(origin)?;
        let mut queue = oq.lock().await;
        queue.pop()
    }

    pub async fn pop_batch_for_origin(&self, origin: &str, n: usize) -> Vec<CrawlJob> {
        let Some(oq) = self.origins.get(origin) else {
            return Vec::new();
        };
        let mut queue = oq.lock().await;
        let mut batch = Vec::with_capacity(n.min(queue.len()));
        for _ in 0..n {
            match queue.pop() {
                Some(job) => batch.push(job),
                None => break,
            }
        }
        batch
    }

    pub async fn push_back(&self, origin: &str, jobs: Vec<CrawlJob>) {
        if jobs.is_empty() {
            return;
        }
        let oq = self.get_origin_queue(origin);
        let mut queue = oq.lock().await;
        for job in jobs {
            let normalized = Self::normalize_url(&job.url);
            queue.push(normalized, job);
        }
    }

    pub async fn is_origin_empty(&self, origin: &str) -> bool {
        match self.origins.get(origin) {
            Some(oq) => oq.lock().await.is_empty(),
            None => true,
        }
    }

    pub async fn len(&self) -> usize {
        let mut total = 0;
        for entry in self.origins.iter() {
            total += entry.value().lock().await.len();
        }
        total
    }

    pub async fn origin_len(&self, origin: &str) -> usize {
        match self.origins.get(origin) {
            Some(oq) => oq.lock().await.len(),
            None => 0,
        }
    }

    pub fn record_host_visit(&self, host: &str) {
        self.host_last_seen.insert(host.to_string(), Instant::now());
    }

    pub fn can_visit_host(&self, host: &str, min_delay: Duration) -> bool {
        match self.host_last_seen.get(host) {
            Some(last) => last.elapsed() >= min_delay,
            None => true,
        }
    }

    /// Attempts to reserve one of this origin's in-flight slots. Returns
    /// `false` (and reserves nothing) if the origin is already at its cap —
    /// the caller should leave the job in the queue and try another origin.
    pub fn try_acquire_origin_slot(&self, origin: &str) -> bool {
        let counter = self
            .in_flight
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();
        loop {
            let current = counter.load(AtomicOrdering::SeqCst);
            if current >= self.per_origin_concurrency {
                return false;
            }
            if counter
                .compare_exchange(
                    current,
                    current + 1,
                    AtomicOrdering::SeqCst,
                    AtomicOrdering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release_origin_slot(&self, origin: &str) {
        if let Some(counter) = self.in_flight.get(origin) {
            counter.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }

    /// Adds seed URLs, bypassing the dedup filter (seeds are re-crawled
    /// every session since they may have grown new links).
    pub async fn add_seeds(&self, urls: &[String]) -> usize {
        let mut added = 0;
        for url_str in urls {
            if let Ok(url) = Url::parse(url_str) {
                let normalized = Self::normalize_url(&url);
                let origin = Self::origin_of(&url);
                let job = CrawlJob {
                    url,
                    depth: 0,
                    source_url: None,
                    priority: 1.0,
                    retry_count: 0,
                };

                {
                    let mut bloom = self.seen_urls.lock().await;
                    bloom.insert(&normalized);
                }
                let oq = self.get_origin_queue(&origin);
                let mut queue = oq.lock().await;
                queue.push(normalized, job);
                added += 1;
            }
        }
        debug!(added, total = urls.len(), "added seeds to frontier");
        added
    }

    pub async fn is_empty(&self) -> bool {
        for entry in self.origins.iter() {
            if !entry.value().lock().await.is_empty() {
                return false;
            }
        }
        true
    }

    /// Snapshot of origins that currently have a queue (may be empty).
    /// Workers round-robin over this list rather than owning one origin
    /// each, since the origin set grows as catalog pages are discovered.
    pub fn known_origins(&self) -> Vec<String> {
        self.origins.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(url: &str, priority: f64) -> CrawlJob {
        CrawlJob {
            url: Url::parse(url).unwrap(),
            depth: 0,
            source_url: None,
            priority,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_url_is_rejected() {
        let frontier = CrawlFrontier::new(2);
        assert!(frontier.push(job("https://example.com/a", 1.0)).await);
        assert!(!frontier.push(job("https://example.com/a", 1.0)).await);
    }

    #[tokio::test]
    async fn trailing_slash_and_case_are_normalized() {
        let frontier = CrawlFrontier::new(2);
        assert!(frontier.push(job("https://Example.com/a/", 1.0)).await);
        assert!(!frontier.push(job("https://example.com/a", 1.0)).await);
    }

    #[tokio::test]
    async fn pops_highest_priority_first() {
        let frontier = CrawlFrontier::new(2);
        frontier.push(job("https://example.com/low", 0.1)).await;
        frontier.push(job("https://example.com/high", 0.9)).await;
        let first = frontier.pop_for_origin("example.com").await.unwrap();
        assert_eq!(first.url.as_str(), "https://example.com/high");
    }

    #[tokio::test]
    async fn per_origin_slot_cap_is_enforced() {
        let frontier = CrawlFrontier::new(2);
        assert!(frontier.try_acquire_origin_slot("example.com"));
        assert!(frontier.try_acquire_origin_slot("example.com"));
        assert!(!frontier.try_acquire_origin_slot("example.com"));
        frontier.release_origin_slot("example.com");
        assert!(frontier.try_acquire_origin_slot("example.com"));
    }

    #[tokio::test]
    async fn retry_bypasses_dedup() {
        let frontier = CrawlFrontier::new(2);
        assert!(frontier.push(job("https://example.com/a", 1.0)).await);
        let mut retry = job("https://example.com/a", 0.5);
        retry.retry_count = 1;
        assert!(frontier.push(retry).await);
    }
}
