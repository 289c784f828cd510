use thiserror::Error;

/// Error taxonomy for the crawler core. Each variant corresponds to one kind
/// in the failure-semantics table: most are recovered locally by the stage
/// that produced them, a few escape to the scheduler and beyond.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("http {0}")]
    Http4xx(u16),

    #[error("http {0}")]
    Http5xx(u16),

    #[error("http {0} after exhausting retries")]
    Http5xxExhausted(u16),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("quality gate miss: {0}")]
    QualityGateMiss(String),

    #[error("normalizer unavailable: {0}")]
    NormalizerUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("stale write: last_crawled would move backwards for {0}")]
    Stale(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Whether this error kind is permanent for the URL that produced it
    /// (never retried by the Scheduler).
    pub fn is_permanent(&self) -> bool {
        matches!(self, CrawlError::Http4xx(_) | CrawlError::QualityGateMiss(_))
    }
}
