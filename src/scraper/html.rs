//! Selector-driven HTML scraper
//!
//! Configured sources are scraped by walking paginated listing or search
//! pages and pulling one `ListingRecord` out of every element matched by
//! the source's `item` selector:
//! - title and link are required; records missing either are dropped
//! - links and images are resolved against the page URL
//! - prices go through `parse_price`
//! - a page with no items ends pagination

use crate::config::{CrawlerConfig, SelectorConfig, SourceEntry};
use crate::scraper::fetcher::{fetch_page, polite_sleep, random_delay};
use crate::scraper::price::parse_price;
use crate::scraper::{ListingRecord, ScrapeContext, ScrapeError, Scraper};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Compiled form of `SelectorConfig`
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    item: Selector,
    title: Selector,
    link: Selector,
    price: Option<Selector>,
    image: Option<Selector>,
}

impl ListingSelectors {
    pub fn compile(config: &SelectorConfig) -> Result<Self, ScrapeError> {
        let parse = |css: &str| {
            Selector::parse(css).map_err(|e| ScrapeError::Selector(format!("'{}': {:?}", css, e)))
        };

        Ok(Self {
            item: parse(&config.item)?,
            title: parse(&config.title)?,
            link: parse(&config.link)?,
            price: config.price.as_deref().map(parse).transpose()?,
            image: config.image.as_deref().map(parse).transpose()?,
        })
    }
}

/// Which pages a source is walked through
#[derive(Debug, Clone)]
enum PageWalk {
    /// One paginated listing, template contains `{page}`
    Listing(String),
    /// One paginated search per term, template contains `{term}` and `{page}`
    Search(String),
}

/// Scraper for one configured source
#[derive(Debug, Clone)]
pub struct HtmlScraper {
    source: String,
    client: Client,
    walk: PageWalk,
    max_pages: u32,
    selectors: ListingSelectors,
    delay_min: u64,
    delay_max: u64,
}

impl HtmlScraper {
    pub fn from_entry(
        entry: &SourceEntry,
        crawler: &CrawlerConfig,
        client: Client,
    ) -> Result<Self, ScrapeError> {
        let walk = match (&entry.listing_url, &entry.search_url) {
            (Some(listing), _) => PageWalk::Listing(listing.clone()),
            (None, Some(search)) => PageWalk::Search(search.clone()),
            (None, None) => {
                return Err(ScrapeError::Other(format!(
                    "source '{}' has neither listing-url nor search-url",
                    entry.name
                )))
            }
        };

        Ok(Self {
            source: entry.name.clone(),
            client,
            walk,
            max_pages: entry.max_pages.unwrap_or(crawler.max_pages),
            selectors: ListingSelectors::compile(&entry.selectors)?,
            delay_min: crawler.request_delay_min,
            delay_max: crawler.request_delay_max,
        })
    }

    /// (found-by term, URL template) pairs to walk
    fn targets(&self, ctx: &ScrapeContext) -> Vec<(Option<String>, String)> {
        match &self.walk {
            PageWalk::Listing(template) => vec![(None, template.clone())],
            PageWalk::Search(template) => ctx
                .search_terms()
                .unwrap_or_default()
                .iter()
                .filter(|t| !t.trim().is_empty())
                .map(|t| (Some(t.clone()), template.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Scraper for HtmlScraper {
    async fn scrape(&self, ctx: &ScrapeContext) -> Result<Vec<ListingRecord>, ScrapeError> {
        let targets = self.targets(ctx);
        if targets.is_empty() {
            tracing::warn!("{} - no search terms to search for", self.source);
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut seen_links = HashSet::new();
        let mut requests = 0u32;
        let mut cancelled = false;

        'targets: for (term, template) in targets {
            if let Some(term) = &term {
                ctx.log(format!("  → search: '{}'", term));
            }

            for page in 1..=self.max_pages {
                if ctx.is_cancel_requested() {
                    cancelled = true;
                    break 'targets;
                }

                if requests > 0 {
                    let delay = random_delay(self.delay_min, self.delay_max);
                    if !polite_sleep(delay, ctx.cancel_token()).await {
                        cancelled = true;
                        break 'targets;
                    }
                }

                let url = fill_template(&template, term.as_deref(), page);
                requests += 1;
                tracing::debug!("{} - fetching page {}: {}", self.source, page, url);

                let body = match fetch_page(&self.client, &url).await {
                    Ok(body) => body,
                    Err(e) if records.is_empty() => return Err(e),
                    Err(e) => {
                        tracing::warn!("{} - stopping at page {}: {}", self.source, page, e);
                        break;
                    }
                };

                let page_url = Url::parse(&url).map_err(|e| ScrapeError::Parse(e.to_string()))?;
                let found = extract_listings(
                    &body,
                    &page_url,
                    &self.selectors,
                    &self.source,
                    term.as_deref(),
                );

                if found.is_empty() {
                    break;
                }

                let before = records.len();
                for record in found {
                    if seen_links.insert(record.link.clone()) {
                        records.push(record);
                    }
                }

                // Sites that clamp the page number keep serving the last page
                if records.len() == before {
                    break;
                }
            }
        }

        if cancelled {
            tracing::info!("{} - cancelled after {} requests", self.source, requests);
            if records.is_empty() {
                return Err(ScrapeError::Cancelled);
            }
        }

        tracing::info!("{} - scraped {} listings", self.source, records.len());
        Ok(records)
    }
}

/// Substitutes `{term}` (form-encoded) and `{page}` in a URL template
pub fn fill_template(template: &str, term: Option<&str>, page: u32) -> String {
    let mut url = template.replace("{page}", &page.to_string());
    if let Some(term) = term {
        let encoded: String = url::form_urlencoded::byte_serialize(term.as_bytes()).collect();
        url = url.replace("{term}", &encoded);
    }
    url
}

/// Extracts listing records from one page
///
/// # Arguments
///
/// * `html` - The page body
/// * `page_url` - URL the page was fetched from, for resolving relative links
/// * `selectors` - Compiled selectors of the source
/// * `source` - Source identifier stamped on every record
/// * `found_by` - Search term that produced this page, if any
pub fn extract_listings(
    html: &str,
    page_url: &Url,
    selectors: &ListingSelectors,
    source: &str,
    found_by: Option<&str>,
) -> Vec<ListingRecord> {
    let document = Html::parse_document(html);
    let mut records = Vec::new();

    for item in document.select(&selectors.item) {
        let title = match first_text(&item, &selectors.title) {
            Some(t) => t,
            None => continue,
        };

        let link = item
            .select(&selectors.link)
            .next()
            .or_else(|| item.value().attr("href").map(|_| item))
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| resolve_link(href, page_url));

        let link = match link {
            Some(l) => l,
            None => {
                tracing::debug!("Skipping '{}' on {}: no usable link", title, page_url);
                continue;
            }
        };

        let price = selectors
            .price
            .as_ref()
            .and_then(|sel| first_text(&item, sel))
            .and_then(|text| parse_price(&text));

        let image_url = selectors
            .image
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|img| {
                img.value()
                    .attr("src")
                    .or_else(|| img.value().attr("data-src"))
            })
            .and_then(|src| resolve_link(src, page_url));

        records.push(ListingRecord {
            title,
            price,
            image_url,
            link,
            source: source.to_string(),
            found_by_term: found_by.map(str::to_string),
        });
    }

    records
}

/// Collapsed text of the first element matching `selector`
fn first_text(item: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    item.select(selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

/// Resolves an href to an absolute http(s) URL
///
/// Returns None for `javascript:`, `mailto:`, `tel:` and data URIs.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}
