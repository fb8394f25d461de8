use crate::scraper::{ListingRecord, RegisteredSource, ScrapeContext, ScrapeError};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use url::Url;

/// What one scraper invocation produced
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutcome {
    pub listings: Vec<ListingRecord>,
    /// `"<Kind>: <message>"` when the scraper failed
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl ScrapeOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs one source's scraper, turning every failure into data
///
/// Errors and panics never escape: both come back as `error` with empty
/// `listings`. Records without a title or an absolute http(s) link are
/// dropped; records with an empty `source` get the registered name.
pub async fn run_scraper(source: &RegisteredSource, ctx: &ScrapeContext) -> ScrapeOutcome {
    let start = Instant::now();

    let result = AssertUnwindSafe(source.scraper.scrape(ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(ScrapeError::Panic(panic_message(payload.as_ref()))));

    let elapsed = start.elapsed();

    match result {
        Ok(records) => {
            let total = records.len();
            let listings: Vec<ListingRecord> = records
                .into_iter()
                .filter_map(|record| conform(record, &source.name))
                .collect();

            if listings.len() < total {
                tracing::warn!(
                    "{} - dropped {} malformed listings",
                    source.name,
                    total - listings.len()
                );
            }

            ScrapeOutcome {
                listings,
                error: None,
                elapsed,
            }
        }
        Err(e) => {
            let message = format!("{}: {}", e.kind(), e);
            tracing::error!("{} - scraper failed after {:?}: {}", source.name, elapsed, message);
            ScrapeOutcome {
                listings: Vec::new(),
                error: Some(message),
                elapsed,
            }
        }
    }
}

fn conform(mut record: ListingRecord, source_name: &str) -> Option<ListingRecord> {
    if record.title.trim().is_empty() {
        return None;
    }

    match Url::parse(&record.link) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        _ => return None,
    }

    if record.source.is_empty() {
        record.source = source_name.to_string();
    }
    Some(record)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "scraper panicked".to_string()
    }
}
