use anyhow::Result;
use estatecrawler_core::{config::AppConfig, FingerprintStore};
use estatecrawler_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.postgres_url).await?;

    match storage.check_connectivity().await {
        Ok(()) => println!("Database: connected"),
        Err(e) => {
            println!("Database: ERROR - {}", e);
            return Ok(());
        }
    }

    storage.run_migrations().await?;

    let stats = storage.stats().await?;

    println!("\n╔══════════════════════════════════════════════╗");
    println!("║           Estatecrawler Status               ║");
    println!("╠══════════════════════════════════════════════╣");
    println!("║ URLs tracked:       {:>20}    ║", stats.urls_total);
    println!("║ Properties stored:  {:>20}    ║", stats.properties_total);
    println!("║ Properties normalized: {:>17}    ║", stats.properties_normalized);
    for (kind, count) in &stats.urls_by_kind {
        println!("║   {:<17}{:>26}    ║", kind, count);
    }
    println!("╚══════════════════════════════════════════════╝\n");

    Ok(())
}
