use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "estatecrawler", about = "Incremental real-estate listing crawler")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Crawl preset: `full` re-fetches and re-normalizes every URL; `incremental`
    /// skips URLs within `--max-age` and normalizations within `--normalize-ttl`.
    #[arg(long, default_value = "full")]
    pub mode: String,

    /// Run the normalizer stage after extraction.
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub enable_normalizer: bool,

    /// Skip re-extraction when a page's content hash is unchanged since the
    /// last crawl. Defaults to true; pass `--enable-fingerprinting=false` to
    /// force full re-extraction on every visit.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_fingerprinting: bool,

    /// Overrides the incremental-mode max-age, in hours.
    #[arg(long)]
    pub max_age: Option<u64>,

    /// Overrides the incremental-mode normalize TTL, in hours.
    #[arg(long)]
    pub normalize_ttl: Option<u64>,

    /// Print statistics and exit without crawling.
    #[arg(long, default_value_t = false)]
    pub stats: bool,

    /// Sweep URL records untouched for `scheduler.cleanup_idle_age_hours`
    /// (default 30 days) and exit without crawling.
    #[arg(long, default_value_t = false)]
    pub cleanup: bool,

    /// Newline-delimited file of seed URLs to enqueue before crawling.
    #[arg(long)]
    pub seed_file: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search stored properties by free-text query.
    Search {
        /// Free-text query, matched against address/city/neighborhood/description.
        query: String,

        /// Max results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}
