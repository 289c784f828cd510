//! In-memory doubles for `FingerprintStore`/`DedupStore`, behind the
//! `testing` feature. Same trait, no Postgres — for scheduler unit tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::CrawlError;
use crate::types::{DedupStore, FingerprintStore, Property, StoreStats, UpsertOutcome, UrlRecord};

#[derive(Default)]
pub struct InMemoryFingerprintStore {
    records: Mutex<HashMap<String, UrlRecord>>,
}

#[async_trait]
impl FingerprintStore for InMemoryFingerprintStore {
    async fn get(&self, url: &str) -> Result<Option<UrlRecord>, CrawlError> {
        Ok(self.records.lock().await.get(url).cloned())
    }

    async fn upsert(&self, record: &UrlRecord) -> Result<(), CrawlError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(&record.url) {
            if record.last_crawled < existing.last_crawled {
                return Err(CrawlError::Stale(record.url.clone()));
            }
        }
        records.insert(record.url.clone(), record.clone());
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, CrawlError> {
        let records = self.records.lock().await;
        let mut stats = StoreStats {
            urls_total: records.len() as u64,
            ..Default::default()
        };
        for record in records.values() {
            *stats
                .urls_by_kind
                .entry(format!("{:?}", record.page_kind))
                .or_insert(0) += 1;
            *stats.origins.entry(record.origin.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn cleanup_stale(&self, older_than: chrono::Duration) -> Result<u64, CrawlError> {
        let mut records = self.records.lock().await;
        let threshold = chrono::Utc::now() - older_than;
        let before = records.len();
        records.retain(|_, r| r.last_crawled >= threshold);
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryDedupStore {
    by_hash: Mutex<HashMap<String, Property>>,
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn upsert(&self, property: &Property) -> Result<UpsertOutcome, CrawlError> {
        let hash = property.content_hash();
        let mut store = self.by_hash.lock().await;
        let outcome = match store.get(&hash) {
            Some(existing) if existing.description == property.description
                && existing.features == property.features =>
            {
                UpsertOutcome::Unchanged
            }
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        store.insert(hash, property.clone());
        Ok(outcome)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Property>, CrawlError> {
        let query_lower = query.to_lowercase();
        let store = self.by_hash.lock().await;
        let mut matches: Vec<Property> = store
            .values()
            .filter(|p| {
                [&p.description, &p.address, &p.city, &p.neighborhood, &p.property_kind]
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&query_lower))
            })
            .cloned()
            .collect();
        matches.truncate(limit);
        Ok(matches)
    }

    async fn clear_all(&self) -> Result<u64, CrawlError> {
        let mut store = self.by_hash.lock().await;
        let count = store.len() as u64;
        store.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageKind;

    #[tokio::test]
    async fn fingerprint_store_rejects_stale_write() {
        let store = InMemoryFingerprintStore::default();
        let mut record = UrlRecord::new_unvisited("https://example.com/a");
        record.last_crawled = chrono::Utc::now();
        store.upsert(&record).await.unwrap();

        let mut stale = record.clone();
        stale.last_crawled = record.last_crawled - chrono::Duration::seconds(10);
        let result = store.upsert(&stale).await;
        assert!(matches!(result, Err(CrawlError::Stale(_))));
    }

    #[tokio::test]
    async fn cleanup_stale_removes_only_old_records() {
        let store = InMemoryFingerprintStore::default();
        let mut old = UrlRecord::new_unvisited("https://example.com/old");
        old.last_crawled = chrono::Utc::now() - chrono::Duration::days(10);
        store.upsert(&old).await.unwrap();

        let mut fresh = UrlRecord::new_unvisited("https://example.com/fresh");
        fresh.last_crawled = chrono::Utc::now();
        store.upsert(&fresh).await.unwrap();

        let removed = store.cleanup_stale(chrono::Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("https://example.com/fresh").await.unwrap().is_some());
        assert!(store.get("https://example.com/old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fingerprint_store_stats_counts_by_kind() {
        let store = InMemoryFingerprintStore::default();
        let mut record = UrlRecord::new_unvisited("https://example.com/a");
        record.page_kind = PageKind::Advertisement;
        store.upsert(&record).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.urls_total, 1);
    }

    #[tokio::test]
    async fn dedup_store_distinguishes_inserted_updated_unchanged() {
        let store = InMemoryDedupStore::default();
        let property = Property {
            address: Some("Rua X, 1".into()),
            source_url: "https://example.com/a".into(),
            price: Some(100.0),
            description: Some("nice place".into()),
            ..Default::default()
        };
        assert_eq!(store.upsert(&property).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&property).await.unwrap(), UpsertOutcome::Unchanged);

        let mut changed = property.clone();
        changed.description = Some("renovated".into());
        assert_eq!(store.upsert(&changed).await.unwrap(), UpsertOutcome::Updated);
    }
}
