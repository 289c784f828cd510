use anyhow::Result;
use estatecrawler_core::{config::AppConfig, DedupStore};
use estatecrawler_storage::Storage;

pub async fn run(config: AppConfig, query: String, limit: usize) -> Result<()> {
    let storage = Storage::new(&config.database.postgres_url).await?;
    let results = storage.search(&query, limit).await?;
    println!("Found {} results:\n", results.len());
    for p in results {
        println!(
            "  {} - {} ({})",
            p.address.as_deref().unwrap_or("no address"),
            p.price
                .map(|v| format!("{v:.0}"))
                .unwrap_or_else(|| "no price".to_string()),
            p.source_url,
        );
        if let Some(desc) = &p.description {
            println!("    {}", desc.chars().take(120).collect::<String>());
        }
        println!();
    }

    Ok(())
}
