//! Output module for presenting crawl results
//!
//! This module handles:
//! - The plain-text summary printed after a crawl
//! - Tables for search terms, exclude terms, sources, matches and history

mod summary;
mod tables;

pub use summary::{format_crawl_summary, print_crawl_summary};
pub use tables::{
    format_crawl_history, format_exclude_terms, format_matches, format_search_terms,
    format_sources,
};
