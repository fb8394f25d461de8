//! HTTP fetching for the bundled scrapers
//!
//! This module handles:
//! - Building the shared HTTP client (timeout, user agent, compression)
//! - GET requests with status classification
//! - Randomized politeness delays between requests

use crate::config::CrawlerConfig;
use crate::scraper::ScrapeError;
use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds the HTTP client shared by all configured sources
///
/// Redirects are followed; per-request timeouts come from the crawler
/// config since the orchestrator itself enforces none.
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout))
        .connect_timeout(Duration::from_secs(config.request_timeout.min(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a page body
///
/// Any non-2xx status is an error; network failures keep the reqwest error
/// as source.
pub async fn fetch_page(client: &Client, url: &str) -> Result<String, ScrapeError> {
    let response = client.get(url).send().await.map_err(|e| ScrapeError::Http {
        url: url.to_string(),
        source: e,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ScrapeError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| ScrapeError::Http {
        url: url.to_string(),
        source: e,
    })
}

/// Picks a delay uniformly from `[min_ms, max_ms]`
pub fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
}

/// Sleeps for `delay`, waking early if the crawl gets cancelled
///
/// Returns false if the sleep was cut short by cancellation.
pub async fn polite_sleep(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
