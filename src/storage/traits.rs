//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::crawler::CrawlResult;
use crate::matching::{ExcludeTerm, MatchMode, MatchResult, SearchTerm};
use crate::state::Trigger;
use crate::storage::{CrawlLogRecord, SourceRecord, StoredMatch};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations the orchestrator and the
/// CLI need. Methods taking `&mut self` write.
pub trait Storage {
    // ===== Sources =====

    /// Gets the id of a source, creating it if unknown
    ///
    /// New sources are active and sorted after all existing ones.
    fn ensure_source(&mut self, name: &str, base_url: &str) -> StorageResult<i64>;

    /// Gets active sources in ascending sort order
    fn get_active_sources(&self) -> StorageResult<Vec<SourceRecord>>;

    /// Gets all sources in ascending sort order
    fn get_all_sources(&self) -> StorageResult<Vec<SourceRecord>>;

    fn set_source_active(&mut self, source_id: i64, active: bool) -> StorageResult<()>;

    /// Swaps a source with the one crawled just before it
    ///
    /// Returns false if the source already comes first.
    fn move_source_up(&mut self, source_id: i64) -> StorageResult<bool>;

    /// Swaps a source with the one crawled just after it
    fn move_source_down(&mut self, source_id: i64) -> StorageResult<bool>;

    /// Records the outcome of crawling a source
    ///
    /// # Arguments
    ///
    /// * `source_id` - The source ID
    /// * `error` - `None` on success: stamps `last_crawl_at` and clears the
    ///   error. `Some` on failure: stores the error, leaves `last_crawl_at`.
    fn update_source_status(&mut self, source_id: i64, error: Option<&str>) -> StorageResult<()>;

    // ===== Search Terms =====

    /// Gets active search terms in ascending sort order
    fn get_active_search_terms(&self) -> StorageResult<Vec<SearchTerm>>;

    fn get_all_search_terms(&self) -> StorageResult<Vec<SearchTerm>>;

    /// Creates a search term at the end of the sort order
    ///
    /// Fails with `ConstraintViolation` if the term exists (ignoring case).
    fn create_search_term(&mut self, term: &str, mode: MatchMode) -> StorageResult<i64>;

    fn set_search_term_active(&mut self, term_id: i64, active: bool) -> StorageResult<()>;

    fn set_search_term_mode(&mut self, term_id: i64, mode: MatchMode) -> StorageResult<()>;

    /// Swaps a term with its predecessor in the sort order
    ///
    /// Returns false if the term already comes first.
    fn move_search_term_up(&mut self, term_id: i64) -> StorageResult<bool>;

    fn move_search_term_down(&mut self, term_id: i64) -> StorageResult<bool>;

    /// Deletes a search term together with its matches
    fn delete_search_term(&mut self, term_id: i64) -> StorageResult<()>;

    // ===== Exclude Terms =====

    /// Gets the text of every active exclude term
    fn get_active_exclude_terms(&self) -> StorageResult<Vec<String>>;

    fn get_all_exclude_terms(&self) -> StorageResult<Vec<ExcludeTerm>>;

    fn create_exclude_term(&mut self, term: &str) -> StorageResult<i64>;

    fn set_exclude_term_active(&mut self, term_id: i64, active: bool) -> StorageResult<()>;

    fn delete_exclude_term(&mut self, term_id: i64) -> StorageResult<()>;

    /// Seeds `defaults` if the exclude term table is empty
    ///
    /// # Returns
    ///
    /// The number of terms inserted
    fn ensure_default_exclude_terms(&mut self, defaults: &[String]) -> StorageResult<usize>;

    // ===== Matches =====

    /// Persists match results, skipping (url, search term) pairs already stored
    ///
    /// # Arguments
    ///
    /// * `results` - Matches to save
    /// * `source_ids` - Source name to source id
    ///
    /// # Returns
    ///
    /// `(new_count, duplicate_count)`. Results with an empty url or a
    /// non-positive term id, and results whose source is not in
    /// `source_ids`, are counted as neither.
    fn save_matches(
        &mut self,
        results: &[MatchResult],
        source_ids: &HashMap<String, i64>,
    ) -> StorageResult<(u32, u32)>;

    /// Gets unseen matches, newest first
    fn get_new_matches(&self) -> StorageResult<Vec<StoredMatch>>;

    /// Gets all matches grouped by term sort order, newest first within a term
    fn get_all_matches(&self) -> StorageResult<Vec<StoredMatch>>;

    fn count_new_matches(&self) -> StorageResult<u64>;

    /// Marks all matches as seen and stamps the last-seen time
    ///
    /// # Returns
    ///
    /// The number of matches that were new
    fn mark_matches_seen(&mut self) -> StorageResult<u64>;

    // ===== Crawl Logs =====

    /// Creates a crawl log row in `running` state
    fn create_crawl_log(&mut self, trigger: Trigger, config_hash: &str) -> StorageResult<i64>;

    /// Writes the counters, status and completion time of a run
    fn update_crawl_log(&mut self, log_id: i64, result: &CrawlResult) -> StorageResult<()>;

    /// Gets the most recent crawl logs, newest first
    fn get_recent_crawl_logs(&self, limit: u32) -> StorageResult<Vec<CrawlLogRecord>>;
}
