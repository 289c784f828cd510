pub mod config;
pub mod error;
#[cfg(feature = "testing")]
pub mod testing;
pub mod types;

pub use config::AppConfig;
pub use error::CrawlError;
pub use types::*;
