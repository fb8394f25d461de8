//! Plain-text tables for the management commands

use crate::matching::{ExcludeTerm, SearchTerm};
use crate::storage::{CrawlLogRecord, SourceRecord, StoredMatch};

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Shortens `text` to at most `max` characters, marking the cut with "…"
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

pub fn format_search_terms(terms: &[SearchTerm]) -> String {
    if terms.is_empty() {
        return "No search terms.\n".to_string();
    }

    let mut out = format!("{:>4}  {:<30} {:<8} {:<6}\n", "ID", "TERM", "MODE", "ACTIVE");
    for term in terms {
        out.push_str(&format!(
            "{:>4}  {:<30} {:<8} {:<6}\n",
            term.id,
            truncate(&term.term, 30),
            term.mode,
            yes_no(term.is_active)
        ));
    }
    out
}

pub fn format_exclude_terms(terms: &[ExcludeTerm]) -> String {
    if terms.is_empty() {
        return "No exclude terms.\n".to_string();
    }

    let mut out = format!("{:>4}  {:<30} {:<6}\n", "ID", "TERM", "ACTIVE");
    for term in terms {
        out.push_str(&format!(
            "{:>4}  {:<30} {:<6}\n",
            term.id,
            truncate(&term.term, 30),
            yes_no(term.is_active)
        ));
    }
    out
}

pub fn format_sources(sources: &[SourceRecord]) -> String {
    if sources.is_empty() {
        return "No sources configured.\n".to_string();
    }

    let mut out = format!(
        "{:>4}  {:<28} {:<6} {:<20} {}\n",
        "ID", "NAME", "ACTIVE", "LAST CRAWL", "LAST ERROR"
    );
    for source in sources {
        let last_crawl = source
            .last_crawl_at
            .as_deref()
            .map(|t| truncate(t, 19))
            .unwrap_or_else(|| "never".to_string());
        out.push_str(&format!(
            "{:>4}  {:<28} {:<6} {:<20} {}\n",
            source.id,
            truncate(&source.name, 28),
            yes_no(source.is_active),
            last_crawl,
            source.last_error.as_deref().unwrap_or("-")
        ));
    }
    out
}

pub fn format_matches(matches: &[StoredMatch]) -> String {
    if matches.is_empty() {
        return "No matches.\n".to_string();
    }

    let mut out = String::new();
    for m in matches {
        let price = m
            .price
            .map(|p| format!("CHF {:.2}", p))
            .unwrap_or_else(|| "price on request".to_string());
        out.push_str(&format!(
            "{}[{}] {} ({}, {})\n    {}\n",
            if m.is_new { "* " } else { "  " },
            m.search_term,
            m.title,
            m.source,
            price,
            m.url
        ));
    }
    out
}

pub fn format_crawl_history(logs: &[CrawlLogRecord]) -> String {
    if logs.is_empty() {
        return "No crawls recorded.\n".to_string();
    }

    let mut out = format!(
        "{:>4}  {:<20} {:<8} {:<11} {:>9} {:>8} {:>5}\n",
        "ID", "STARTED", "TRIGGER", "STATUS", "SOURCES", "LISTINGS", "NEW"
    );
    for log in logs {
        out.push_str(&format!(
            "{:>4}  {:<20} {:<8} {:<11} {:>9} {:>8} {:>5}\n",
            log.id,
            truncate(&log.started_at, 19),
            log.trigger,
            log.status.status_text(),
            format!("{}/{}", log.sources_succeeded, log.sources_attempted),
            log.total_listings,
            log.new_matches
        ));
        if !log.failed_sources.is_empty() {
            out.push_str(&format!("      failed: {}\n", log.failed_sources.join(", ")));
        }
    }
    out
}
