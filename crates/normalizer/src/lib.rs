use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use estatecrawler_core::{CrawlError, Normalizer, Property};
use tokio::sync::Mutex;

/// Opaque vendor boundary. The crawler never talks to a real LLM provider;
/// callers inject whatever client implements this (a live HTTP client in
/// production, a canned-response double in tests).
#[async_trait]
pub trait LlmClient: Send + Sync + 'static {
    async fn normalize_batch(&self, properties: &[Property]) -> Result<Vec<Property>, CrawlError>;
}

/// Wraps an `LlmClient` with a read-through cache (keyed by content hash,
/// manual TTL) and a batch buffer so callers can either normalize one
/// property inline or accumulate several and flush them in one vendor call.
pub struct CachingNormalizer<C> {
    client: C,
    cache: DashMap<String, (Property, Instant)>,
    ttl: Duration,
    buffer: Mutex<Vec<Property>>,
    batch_size: usize,
}

impl<C: LlmClient> CachingNormalizer<C> {
    pub fn new(client: C, ttl: Duration, batch_size: usize) -> Self {
        Self {
            client,
            cache: DashMap::new(),
            ttl,
            buffer: Mutex::new(Vec::new()),
            batch_size,
        }
    }

    fn cached(&self, key: &str) -> Option<Property> {
        let entry = self.cache.get(key)?;
        if entry.1.elapsed() < self.ttl {
            Some(entry.0.clone())
        } else {
            None
        }
    }

    /// Queues a property for the next batch flush. Flushes immediately if
    /// the buffer has reached `batch_size`.
    pub async fn enqueue(&self, property: Property) -> Result<(), CrawlError> {
        let mut buf = self.buffer.lock().await;
        buf.push(property);
        let should_flush = buf.len() >= self.batch_size;
        drop(buf);
        if should_flush {
            self.drain().await?;
        }
        Ok(())
    }

    /// Flushes whatever is currently buffered, one vendor call for the
    /// whole batch, and primes the cache with the results.
    pub async fn drain(&self) -> Result<Vec<Property>, CrawlError> {
        let mut buf = self.buffer.lock().await;
        if buf.is_empty() {
            return Ok(Vec::new());
        }
        let batch = std::mem::take(&mut *buf);
        drop(buf);

        let normalized = self.client.normalize_batch(&batch).await?;
        for p in &normalized {
            self.cache.insert(p.content_hash(), (p.clone(), Instant::now()));
        }
        Ok(normalized)
    }

    pub fn pending_count(&self) -> usize {
        self.buffer.try_lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[async_trait]
impl<C: LlmClient> Normalizer for CachingNormalizer<C> {
    async fn normalize(&self, property: &Property) -> Result<Property, CrawlError> {
        let key = property.content_hash();
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let normalized = self
            .client
            .normalize_batch(std::slice::from_ref(property))
            .await?;
        let result = normalized.into_iter().next().ok_or_else(|| {
            CrawlError::NormalizerUnavailable("vendor returned an empty batch".into())
        })?;
        self.cache.insert(key, (result.clone(), Instant::now()));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoClient {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn normalize_batch(
            &self,
            properties: &[Property],
        ) -> Result<Vec<Property>, CrawlError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(properties
                .iter()
                .cloned()
                .map(|mut p| {
                    p.city = Some("Normalized City".to_string());
                    p
                })
                .collect())
        }
    }

    fn sample_property(url: &str) -> Property {
        Property {
            address: Some("Rua X, 1".into()),
            source_url: url.into(),
            price: Some(100.0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn normalize_caches_result_by_content_hash() {
        let client = EchoClient {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let normalizer = CachingNormalizer::new(client, Duration::from_secs(60), 5);
        let property = sample_property("https://example.com/a");

        let first = normalizer.normalize(&property).await.unwrap();
        let second = normalizer.normalize(&property).await.unwrap();

        assert_eq!(first.city.as_deref(), Some("Normalized City"));
        assert_eq!(second.city.as_deref(), Some("Normalized City"));
        assert_eq!(
            normalizer.client.calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn enqueue_flushes_at_batch_size() {
        let client = EchoClient {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let normalizer = CachingNormalizer::new(client, Duration::from_secs(60), 2);

        normalizer
            .enqueue(sample_property("https://example.com/a"))
            .await
            .unwrap();
        assert_eq!(normalizer.pending_count(), 1);

        normalizer
            .enqueue(sample_property("https://example.com/b"))
            .await
            .unwrap();
        assert_eq!(normalizer.pending_count(), 0);
        assert_eq!(
            normalizer.client.calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn expired_cache_entry_triggers_revalidation() {
        let client = EchoClient {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let normalizer = CachingNormalizer::new(client, Duration::from_millis(1), 5);
        let property = sample_property("https://example.com/a");

        normalizer.normalize(&property).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        normalizer.normalize(&property).await.unwrap();

        assert_eq!(
            normalizer.client.calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }
}
