//! Market-Sweep: a marketplace listing aggregator
//!
//! This crate runs a set of marketplace scrapers one after another, matches
//! their listings against user-defined search terms and stores new matches,
//! while a lock file keeps CLI, cron and web-triggered crawls from overlapping.

pub mod config;
pub mod crawler;
pub mod lock;
pub mod matching;
pub mod output;
pub mod scraper;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Market-Sweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Lock error: {0}")]
    Lock(#[from] lock::LockError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] crawler::CrawlError),

    #[error("Scraper error: {0}")]
    Scrape(#[from] scraper::ScrapeError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// Result type alias for Market-Sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlResult, Orchestrator};
pub use lock::{CrawlLock, LockHandle, LockInfo};
pub use matching::{find_matches, MatchMode, MatchResult, MatchType};
pub use state::{CrawlMonitor, CrawlState, CrawlStatus, Trigger};
