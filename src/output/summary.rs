//! Human-readable crawl summary
//!
//! Printed by the `crawl` command once a run is over.

use crate::crawler::CrawlResult;
use crate::state::CrawlStatus;

/// Formats a finished crawl as a plain-text summary
///
/// # Arguments
///
/// * `result` - The finished run
///
/// # Returns
///
/// A multi-line summary ending in a newline
pub fn format_crawl_summary(result: &CrawlResult) -> String {
    let mut out = String::new();

    out.push_str("=== Crawl Summary ===\n\n");
    out.push_str(&format!("Status:    {}\n", result.status));
    out.push_str(&format!("Trigger:   {}\n", result.trigger));
    out.push_str(&format!(
        "Started:   {}\n",
        result.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "Duration:  {:.1}s\n\n",
        result.duration.as_secs_f64()
    ));

    out.push_str("Sources:\n");
    out.push_str(&format!("  Attempted: {}\n", result.sources_attempted));
    out.push_str(&format!("  Succeeded: {}\n", result.sources_succeeded));
    out.push_str(&format!("  Failed:    {}\n", result.sources_failed));
    if result.sources_interrupted > 0 {
        out.push_str(&format!("  Cancelled: {}\n", result.sources_interrupted));
    }
    out.push('\n');

    out.push_str("Listings:\n");
    out.push_str(&format!("  Seen:              {}\n", result.total_listings));
    out.push_str(&format!("  New matches:       {}\n", result.new_matches));
    out.push_str(&format!("  Known matches:     {}\n", result.duplicate_matches));

    if !result.failed_sources.is_empty() {
        out.push_str(&format!(
            "\nFailed sources ({}):\n",
            result.failed_sources.len()
        ));
        for source in &result.failed_sources {
            out.push_str(&format!("  - {}\n", source));
        }
    }

    match result.status {
        CrawlStatus::NoSources => out.push_str("\nNo active sources to crawl.\n"),
        CrawlStatus::Cancelled => out.push_str("\nCrawl was cancelled before all sources ran.\n"),
        _ => {}
    }

    out
}

/// Prints the summary to stdout
pub fn print_crawl_summary(result: &CrawlResult) {
    print!("{}", format_crawl_summary(result));
}
