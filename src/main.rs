mod cli;
mod commands;
mod crawl;
mod seeds;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// mimalloc keeps memory bounded under the worker pool's sustained allocation
// churn the way glibc malloc doesn't.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use estatecrawler_core::config::AppConfig;
use estatecrawler_core::FingerprintStore;
use estatecrawler_storage::Storage;

use crate::cli::{Cli, Commands};
use crate::crawl::run_crawl;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .max_blocking_threads(64)
        .enable_all()
        .build()?;

    let exit_code = runtime.block_on(async_main())?;
    std::process::exit(exit_code);
}

async fn async_main() -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let config: AppConfig = toml::from_str(&config_str)?;

    if let Some(Commands::Search { query, limit }) = &cli.command {
        commands::search::run(config, query.clone(), *limit).await?;
        return Ok(0);
    }

    if cli.stats {
        commands::status::run(config).await?;
        return Ok(0);
    }

    if cli.cleanup {
        let storage = Storage::with_pool_size(&config.database.postgres_url, config.database.pool_size)
            .await?;
        storage.run_migrations().await?;
        let idle_age = config.scheduler.cleanup_idle_age_hours;
        let removed = storage
            .cleanup_stale(chrono::Duration::hours(idle_age as i64))
            .await?;
        println!("removed {removed} stale url records (idle longer than {idle_age}h)");
        return Ok(0);
    }

    match run_crawl(config, &cli).await {
        Ok(true) => Ok(2),
        Ok(false) => Ok(0),
        Err(e) => {
            eprintln!("crawl failed: {e}");
            Ok(1)
        }
    }
}
