use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use estatecrawler_core::{CrawlError, FetchConfig, FetchResponse, Fetcher};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

/// Retry/backoff policy: base delay, exponential factor, jitter fraction,
/// and a cap on attempts. Backoff itself is also capped so a flaky host
/// can't stall a worker indefinitely.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub jitter_pct: f64,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            jitter_pct: 0.2,
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_millis() as f64 * self.factor.powi(attempt as i32);
        let capped = raw.min(self.cap.as_millis() as f64);
        let jitter_span = capped * self.jitter_pct;
        let jitter = rand::random::<f64>() * jitter_span * 2.0 - jitter_span;
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Single real-world HTTP fetcher. Bounds concurrency per host with a
/// `Semaphore` per origin (created lazily, kept in a `DashMap`) and retries
/// transient failures with jittered exponential backoff.
pub struct HttpFetcher {
    client: reqwest::Client,
    host_gates: DashMap<String, Arc<Semaphore>>,
    per_host_concurrency: usize,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(per_host_concurrency: usize, retry: RetryPolicy) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| CrawlError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            host_gates: DashMap::new(),
            per_host_concurrency,
            retry,
        })
    }

    fn gate_for(&self, host: &str) -> Arc<Semaphore> {
        self.host_gates
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_concurrency)))
            .clone()
    }

    fn classify_status(status: u16) -> Option<CrawlError> {
        if (400..500).contains(&status) {
            Some(CrawlError::Http4xx(status))
        } else if (500..600).contains(&status) {
            Some(CrawlError::Http5xx(status))
        } else {
            None
        }
    }

    async fn fetch_once(
        &self,
        url: &Url,
        config: &FetchConfig,
    ) -> Result<FetchResponse, CrawlError> {
        let start = Instant::now();
        let resp = self
            .client
            .get(url.as_str())
            .header("User-Agent", &config.user_agent)
            .timeout(config.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CrawlError::Timeout(config.timeout.as_secs())
                } else {
                    CrawlError::Transport(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if let Some(err) = Self::classify_status(status) {
            return Err(err);
        }

        let final_url = Url::parse(resp.url().as_str()).unwrap_or_else(|_| url.clone());
        let mut headers = std::collections::HashMap::new();
        for (k, v) in resp.headers() {
            if let Ok(val) = v.to_str() {
                headers.insert(k.as_str().to_string(), val.to_string());
            }
        }
        let content_type = headers.get("content-type").cloned();

        let body = resp
            .bytes()
            .await
            .map_err(|e| CrawlError::Transport(e.to_string()))?;

        if body.len() > config.max_body_size {
            return Err(CrawlError::BodyTooLarge {
                size: body.len(),
                max: config.max_body_size,
            });
        }

        Ok(FetchResponse {
            url: url.clone(),
            final_url,
            status,
            headers,
            body: body.to_vec(),
            content_type,
            fetched_at: chrono::Utc::now(),
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
        let host = url.host_str().unwrap_or("").to_string();
        let gate = self.gate_for(&host);
        let _permit = gate
            .acquire_owned()
            .await
            .map_err(|e| CrawlError::Other(e.into()))?;

        let mut last_err = CrawlError::Transport("no attempts made".into());
        for attempt in 0..self.retry.max_attempts {
            match self.fetch_once(url, config).await {
                Ok(resp) => {
                    if attempt > 0 {
                        debug!(url = %url, attempt, "fetch succeeded after retry");
                    }
                    return Ok(resp);
                }
                Err(e) if e.is_permanent() => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "fetch failed, will retry");
                    last_err = e;
                    if attempt + 1 < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        match last_err {
            CrawlError::Http5xx(s) => Err(CrawlError::Http5xxExhausted(s)),
            other => Err(other),
        }
    }
}
