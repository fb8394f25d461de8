//! Storage module for persisting crawl data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Source bookkeeping (active flag, order, last crawl, last error)
//! - Search and exclude term management
//! - Match persistence with (url, search term) deduplication
//! - Crawl log history

mod schema;
mod sqlite;
mod traits;

pub use schema::initialize_schema;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{CrawlStatus, Trigger};

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(SweepError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> crate::Result<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Represents a marketplace source in the database
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub is_active: bool,
    pub sort_order: i64,
    /// Time of the last successful crawl (RFC 3339)
    pub last_crawl_at: Option<String>,
    /// Error of the last crawl, cleared on the next success
    pub last_error: Option<String>,
}

/// Represents a persisted match joined with its source and term
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: i64,
    pub source: String,
    pub search_term_id: i64,
    pub search_term: String,
    pub title: String,
    pub price: Option<f64>,
    pub url: String,
    pub image_url: Option<String>,
    pub is_new: bool,
    pub created_at: String,
}

/// Represents one row of the crawl history
#[derive(Debug, Clone)]
pub struct CrawlLogRecord {
    pub id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: CrawlStatus,
    pub trigger: Trigger,
    pub sources_attempted: u32,
    pub sources_succeeded: u32,
    pub sources_failed: u32,
    pub total_listings: u32,
    pub new_matches: u32,
    pub duplicate_matches: u32,
    pub failed_sources: Vec<String>,
    pub duration_seconds: Option<f64>,
    pub config_hash: String,
}
