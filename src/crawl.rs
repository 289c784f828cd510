//! Wires the capability set the Scheduler needs and runs the worker pool
//! to completion or `ctrl_c`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use estatecrawler_classifier::Classifier;
use estatecrawler_core::config::AppConfig;
use estatecrawler_core::{CrawlError, DedupStore, FingerprintStore, Property};
use estatecrawler_fetcher::{HttpFetcher, RetryPolicy};
use estatecrawler_frontier::CrawlFrontier;
use estatecrawler_normalizer::{CachingNormalizer, LlmClient};
use estatecrawler_parser::Extractor;
use estatecrawler_scheduler::{trigger_crawl, CrawlMode, Scheduler};
use estatecrawler_storage::Storage;

use crate::cli::Cli;

/// Stand-in for a real LLM vendor client. Returns each property unchanged —
/// enough to exercise the cache/batch/TTL machinery in `CachingNormalizer`
/// without depending on a concrete external provider.
struct PassthroughLlmClient;

#[async_trait]
impl LlmClient for PassthroughLlmClient {
    async fn normalize_batch(&self, properties: &[Property]) -> Result<Vec<Property>, CrawlError> {
        Ok(properties.to_vec())
    }
}

fn parse_mode(mode: &str) -> Result<CrawlMode> {
    match mode {
        "full" => Ok(CrawlMode::Full),
        "incremental" => Ok(CrawlMode::Incremental),
        other => anyhow::bail!("unknown --mode '{other}', expected 'full' or 'incremental'"),
    }
}

fn retry_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.fetcher.retry_max_attempts,
        base_delay: Duration::from_millis(config.fetcher.retry_base_delay_ms),
        factor: config.fetcher.retry_factor,
        jitter_pct: config.fetcher.retry_jitter_pct,
        cap: Duration::from_millis(config.fetcher.retry_cap_ms),
    }
}

/// Builds the Scheduler's dependency set and runs it to completion. Returns
/// `true` if the run ended because of `ctrl_c` rather than the Frontier
/// draining on its own.
pub async fn run_crawl(mut config: AppConfig, cli: &Cli) -> Result<bool> {
    if let Some(hours) = cli.max_age {
        config.scheduler.max_age_hours = hours;
    }
    if let Some(hours) = cli.normalize_ttl {
        config.scheduler.normalize_ttl_hours = hours;
    }

    let mode = parse_mode(&cli.mode)?;

    let storage = Storage::with_pool_size(&config.database.postgres_url, config.database.pool_size)
        .await?;
    storage.run_migrations().await?;

    let fingerprint_store: Arc<dyn FingerprintStore> = Arc::new(storage.clone());
    let dedup_store: Arc<dyn DedupStore> = Arc::new(storage);

    let fetcher = Arc::new(HttpFetcher::new(
        config.fetcher.per_host_concurrency,
        retry_policy(&config),
    )?);

    let classifier = Arc::new(Classifier::new(config.classifier.clone()));
    let extractor = Arc::new(Extractor::default());

    let normalizer: Option<Arc<dyn estatecrawler_core::Normalizer>> = if cli.enable_normalizer {
        Some(Arc::new(CachingNormalizer::new(
            PassthroughLlmClient,
            Duration::from_secs(config.normalizer.cache_ttl_hours * 3600),
            config.normalizer.batch_size,
        )))
    } else {
        None
    };

    let frontier = Arc::new(CrawlFrontier::with_bloom_params(
        config.frontier.per_origin_concurrency,
        config.frontier.bloom_filter_fp_rate,
        config.frontier.bloom_filter_size,
    ));

    let scheduler = Arc::new(Scheduler::with_fingerprinting(
        frontier,
        fingerprint_store,
        dedup_store,
        fetcher,
        classifier,
        extractor,
        normalizer,
        config.clone(),
        mode,
        cli.enable_fingerprinting,
    ));

    let seed_urls = match &cli.seed_file {
        Some(path) => crate::seeds::load_seed_file(path)?,
        None => Vec::new(),
    };

    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
    let shutdown_tx_for_signal = shutdown_tx.clone();
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_for_signal = Arc::clone(&cancelled);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            cancelled_for_signal.store(true, Ordering::Relaxed);
            let _ = shutdown_tx_for_signal.send(());
        }
    });

    let pool_size = config.frontier.default_worker_pool_size;
    trigger_crawl(scheduler, seed_urls, pool_size, shutdown_tx).await?;
    Ok(cancelled.load(Ordering::Relaxed))
}
