//! Scraper module: the per-source extraction contract
//!
//! # Components
//!
//! - `Scraper`: async trait every source implements
//! - `ScrapeContext`: what a scraper gets to see of the running crawl
//! - `SourceRegistry`: ordered mapping from source name to scraper
//! - `HtmlScraper`: selector-driven scraper built from config entries
//! - `run_scraper`: invokes one scraper with failure isolation

mod fetcher;
mod html;
mod price;
mod registry;
mod runner;

pub use fetcher::{build_http_client, fetch_page, polite_sleep, random_delay};
pub use html::{extract_listings, fill_template, HtmlScraper, ListingSelectors};
pub use price::parse_price;
pub use registry::{RegisteredSource, SourceRegistry};
pub use runner::{run_scraper, ScrapeOutcome};

use crate::state::CrawlMonitor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A single marketplace listing as produced by a scraper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub title: String,
    pub price: Option<f64>,
    pub image_url: Option<String>,
    /// Absolute URL of the listing, identifies it across runs
    pub link: String,
    pub source: String,
    /// Set when the listing came out of a search for this term
    pub found_by_term: Option<String>,
}

impl ListingRecord {
    pub fn new(title: impl Into<String>, link: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            price: None,
            image_url: None,
            link: link.into(),
            source: source.into(),
            found_by_term: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn found_by(mut self, term: impl Into<String>) -> Self {
        self.found_by_term = Some(term.into());
        self
    }
}

/// Errors a scraper can fail with
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{0}")]
    Parse(String),

    #[error("invalid selector {0}")]
    Selector(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Panic(String),

    #[error("{0}")]
    Other(String),
}

impl ScrapeError {
    /// Short category name used when recording a failure
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Http { source, .. } if source.is_timeout() => "Timeout",
            ScrapeError::Http { .. } => "HttpError",
            ScrapeError::Status { .. } => "HttpStatus",
            ScrapeError::Parse(_) => "ParseError",
            ScrapeError::Selector(_) => "SelectorError",
            ScrapeError::Cancelled => "Cancelled",
            ScrapeError::Panic(_) => "Panic",
            ScrapeError::Other(_) => "Error",
        }
    }
}

/// View of the running crawl handed to each scraper
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    search_terms: Option<Vec<String>>,
    cancel: CancellationToken,
    monitor: Option<CrawlMonitor>,
}

impl ScrapeContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            search_terms: None,
            cancel,
            monitor: None,
        }
    }

    /// Terms search-based sources should query for
    pub fn with_search_terms(mut self, terms: Vec<String>) -> Self {
        self.search_terms = Some(terms);
        self
    }

    /// Progress lines written through `log` also go to this monitor
    pub fn with_monitor(mut self, monitor: CrawlMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn search_terms(&self) -> Option<&[String]> {
        self.search_terms.as_deref()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn log(&self, message: impl AsRef<str>) {
        tracing::debug!("{}", message.as_ref());
        if let Some(monitor) = &self.monitor {
            monitor.append_log(message);
        }
    }
}

/// A source-specific listing extractor
///
/// Implementations should check `ctx.is_cancel_requested()` between
/// requests; returning early with what was collected so far is fine.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Collects the listings currently offered by the source
    async fn scrape(&self, ctx: &ScrapeContext) -> Result<Vec<ListingRecord>, ScrapeError>;
}
