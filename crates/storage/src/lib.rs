use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use estatecrawler_core::{
    CrawlError, DedupStore, FingerprintStore, PageKind, Property, StoreStats, UpsertOutcome,
    UrlRecord, UrlStatus,
};

fn page_kind_to_str(kind: PageKind) -> &'static str {
    match kind {
        PageKind::Advertisement => "advertisement",
        PageKind::Catalog => "catalog",
        PageKind::Other => "other",
        PageKind::Unknown => "unknown",
    }
}

fn str_to_page_kind(s: &str) -> PageKind {
    match s {
        "advertisement" => PageKind::Advertisement,
        "catalog" => PageKind::Catalog,
        "other" => PageKind::Other,
        _ => PageKind::Unknown,
    }
}

fn status_to_str(status: UrlStatus) -> &'static str {
    match status {
        UrlStatus::Success => "success",
        UrlStatus::Failed => "failed",
        UrlStatus::Skipped => "skipped",
    }
}

fn str_to_status(s: &str) -> UrlStatus {
    match s {
        "success" => UrlStatus::Success,
        "failed" => UrlStatus::Failed,
        _ => UrlStatus::Skipped,
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::with_pool_size(database_url, 10).await
    }

    pub async fn with_pool_size(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FingerprintStore for Storage {
    async fn get(&self, url: &str) -> Result<Option<UrlRecord>, CrawlError> {
        let row: Option<(
            String,
            String,
            String,
            chrono::DateTime<chrono::Utc>,
            Option<chrono::DateTime<chrono::Utc>>,
            String,
            i64,
            String,
            f64,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT url, origin, content_hash, last_crawled, last_normalized, last_status,
                    property_count, page_kind, confidence, error_text
             FROM url_records WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        Ok(row.map(
            |(url, origin, content_hash, last_crawled, last_normalized, last_status,
              property_count, page_kind, confidence, error_text)| UrlRecord {
                url,
                origin,
                content_hash,
                last_crawled,
                last_normalized,
                last_status: str_to_status(&last_status),
                property_count: property_count as u64,
                page_kind: str_to_page_kind(&page_kind),
                confidence,
                error_text,
            },
        ))
    }

    async fn upsert(&self, record: &UrlRecord) -> Result<(), CrawlError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        let existing: Option<(chrono::DateTime<chrono::Utc>,)> =
            sqlx::query_as("SELECT last_crawled FROM url_records WHERE url = $1 FOR UPDATE")
                .bind(&record.url)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        if let Some((existing_last_crawled,)) = existing {
            if record.last_crawled < existing_last_crawled {
                return Err(CrawlError::Stale(record.url.clone()));
            }
        }

        sqlx::query(
            "INSERT INTO url_records
                (url, origin, content_hash, last_crawled, last_normalized, last_status,
                 property_count, page_kind, confidence, error_text)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (url) DO UPDATE SET
                origin = EXCLUDED.origin,
                content_hash = EXCLUDED.content_hash,
                last_crawled = EXCLUDED.last_crawled,
                last_normalized = EXCLUDED.last_normalized,
                last_status = EXCLUDED.last_status,
                property_count = EXCLUDED.property_count,
                page_kind = EXCLUDED.page_kind,
                confidence = EXCLUDED.confidence,
                error_text = EXCLUDED.error_text",
        )
        .bind(&record.url)
        .bind(&record.origin)
        .bind(&record.content_hash)
        .bind(record.last_crawled)
        .bind(record.last_normalized)
        .bind(status_to_str(record.last_status))
        .bind(record.property_count as i64)
        .bind(page_kind_to_str(record.page_kind))
        .bind(record.confidence)
        .bind(&record.error_text)
        .execute(&mut *tx)
        .await
        .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, CrawlError> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM url_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        let by_kind: Vec<(String, i64)> =
            sqlx::query_as("SELECT page_kind, COUNT(*) FROM url_records GROUP BY page_kind")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        let by_origin: Vec<(String, i64)> =
            sqlx::query_as("SELECT origin, COUNT(*) FROM url_records GROUP BY origin")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        let properties_total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM property_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        let properties_normalized: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM url_records WHERE last_normalized IS NOT NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        Ok(StoreStats {
            urls_total: total.0 as u64,
            urls_by_kind: by_kind.into_iter().map(|(k, c)| (k, c as u64)).collect(),
            properties_total: properties_total.0 as u64,
            properties_normalized: properties_normalized.0 as u64,
            origins: by_origin.into_iter().map(|(o, c)| (o, c as u64)).collect(),
        })
    }

    async fn cleanup_stale(&self, older_than: chrono::Duration) -> Result<u64, CrawlError> {
        let threshold = chrono::Utc::now() - older_than;
        let result = sqlx::query("DELETE FROM url_records WHERE last_crawled < $1")
            .bind(threshold)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DedupStore for Storage {
    async fn upsert(&self, property: &Property) -> Result<UpsertOutcome, CrawlError> {
        let hash = property.content_hash();

        let existing: Option<(Option<String>, Vec<String>)> = sqlx::query_as(
            "SELECT description, features FROM property_records WHERE hash = $1",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        let outcome = match &existing {
            None => UpsertOutcome::Inserted,
            Some((description, features))
                if *description == property.description && *features == property.features =>
            {
                return Ok(UpsertOutcome::Unchanged);
            }
            Some(_) => UpsertOutcome::Updated,
        };

        sqlx::query(
            "INSERT INTO property_records
                (hash, address, city, neighborhood, postal_code, price, price_raw, rooms,
                 bathrooms, total_area, usable_area, property_kind, source_url, description,
                 features, missing_fields, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
             ON CONFLICT (hash) DO UPDATE SET
                address = EXCLUDED.address,
                city = EXCLUDED.city,
                neighborhood = EXCLUDED.neighborhood,
                postal_code = EXCLUDED.postal_code,
                price = EXCLUDED.price,
                price_raw = EXCLUDED.price_raw,
                rooms = EXCLUDED.rooms,
                bathrooms = EXCLUDED.bathrooms,
                total_area = EXCLUDED.total_area,
                usable_area = EXCLUDED.usable_area,
                property_kind = EXCLUDED.property_kind,
                source_url = EXCLUDED.source_url,
                description = EXCLUDED.description,
                features = EXCLUDED.features,
                missing_fields = EXCLUDED.missing_fields,
                updated_at = NOW()",
        )
        .bind(&hash)
        .bind(&property.address)
        .bind(&property.city)
        .bind(&property.neighborhood)
        .bind(&property.postal_code)
        .bind(property.price)
        .bind(&property.price_raw)
        .bind(property.rooms.map(|v| v as i32))
        .bind(property.bathrooms.map(|v| v as i32))
        .bind(property.total_area)
        .bind(property.usable_area)
        .bind(&property.property_kind)
        .bind(&property.source_url)
        .bind(&property.description)
        .bind(&property.features)
        .bind(&property.missing_fields)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        Ok(outcome)
    }

    /// Accent-folded, per-token match across description/address/city/
    /// neighborhood/kind/features, ranked by count of distinct matched
    /// tokens (`unaccent` so "Sao" matches "São").
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Property>, CrawlError> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<f64>,
            Option<String>,
            Option<i32>,
            Option<i32>,
            Option<f64>,
            Option<f64>,
            Option<String>,
            String,
            Option<String>,
            Vec<String>,
            Vec<String>,
        )> = sqlx::query_as(
            "SELECT address, city, neighborhood, postal_code, price, price_raw, rooms,
                    bathrooms, total_area, usable_area, property_kind, source_url,
                    description, features, missing_fields
             FROM (
                SELECT pr.*,
                    (SELECT count(DISTINCT token) FROM unnest($1::text[]) AS token
                     WHERE unaccent(coalesce(pr.description, '')) ILIKE '%' || unaccent(token) || '%'
                        OR unaccent(coalesce(pr.address, '')) ILIKE '%' || unaccent(token) || '%'
                        OR unaccent(coalesce(pr.city, '')) ILIKE '%' || unaccent(token) || '%'
                        OR unaccent(coalesce(pr.neighborhood, '')) ILIKE '%' || unaccent(token) || '%'
                        OR unaccent(coalesce(pr.property_kind, '')) ILIKE '%' || unaccent(token) || '%'
                        OR EXISTS (
                            SELECT 1 FROM unnest(pr.features) AS feat
                            WHERE unaccent(feat) ILIKE '%' || unaccent(token) || '%'
                        )
                    ) AS matched_tokens
                FROM property_records pr
             ) ranked
             WHERE matched_tokens > 0
             ORDER BY matched_tokens DESC
             LIMIT $2",
        )
        .bind(&tokens)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    address,
                    city,
                    neighborhood,
                    postal_code,
                    price,
                    price_raw,
                    rooms,
                    bathrooms,
                    total_area,
                    usable_area,
                    property_kind,
                    source_url,
                    description,
                    features,
                    missing_fields,
                )| Property {
                    address,
                    city,
                    neighborhood,
                    postal_code,
                    price,
                    price_raw,
                    rooms: rooms.map(|v| v as u32),
                    bathrooms: bathrooms.map(|v| v as u32),
                    total_area,
                    usable_area,
                    property_kind,
                    source_url,
                    description,
                    features,
                    missing_fields,
                },
            )
            .collect())
    }

    async fn clear_all(&self) -> Result<u64, CrawlError> {
        let result = sqlx::query("DELETE FROM property_records")
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::StoreUnavailable(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
