use serde::Deserialize;

/// Main configuration structure for Market-Sweep
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub database: DatabaseConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceEntry>,
    /// Exclude terms seeded into an empty exclude-term table on first start
    #[serde(rename = "exclude-defaults", default = "default_exclude_terms")]
    pub exclude_defaults: Vec<String>,
}

/// Crawl behaviour configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Path of the cross-process lock file
    #[serde(rename = "lock-path")]
    pub lock_path: String,

    /// Minimum delay between two requests to the same source (milliseconds)
    #[serde(rename = "request-delay-min", default = "default_delay_min")]
    pub request_delay_min: u64,

    /// Maximum delay between two requests to the same source (milliseconds)
    #[serde(rename = "request-delay-max", default = "default_delay_max")]
    pub request_delay_max: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout", default = "default_timeout")]
    pub request_timeout: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Page cap for sources that don't set their own
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
}

/// One marketplace to scrape
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    /// Unique source identifier, e.g. "waffenboerse.ch"
    pub name: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Listing page template containing `{page}`
    #[serde(rename = "listing-url", default)]
    pub listing_url: Option<String>,

    /// Search page template containing `{term}` and `{page}`
    #[serde(rename = "search-url", default)]
    pub search_url: Option<String>,

    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u32>,

    pub selectors: SelectorConfig,
}

/// CSS selectors used to pull listings out of a page
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    /// Selects one element per listing
    pub item: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

fn default_exclude_terms() -> Vec<String> {
    vec!["CO2".to_string(), "Airsoft".to_string(), "Softair".to_string()]
}

fn default_delay_min() -> u64 {
    2000
}

fn default_delay_max() -> u64 {
    5000
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("Mozilla/5.0 (compatible; MarketSweep/{})", env!("CARGO_PKG_VERSION"))
}

fn default_max_pages() -> u32 {
    5
}
