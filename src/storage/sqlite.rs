//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::crawler::CrawlResult;
use crate::matching::{ExcludeTerm, MatchMode, MatchResult, SearchTerm};
use crate::state::{CrawlStatus, Trigger};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{CrawlLogRecord, SourceRecord, StoredMatch};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const SOURCE_COLUMNS: &str =
    "id, name, base_url, is_active, sort_order, last_crawl_at, last_error";

const TERM_COLUMNS: &str = "id, term, match_type, is_active, sort_order, hide_seen_matches";

const MATCH_QUERY: &str = "
    SELECT m.id, s.name, m.search_term_id, t.term, m.title, m.price, m.url,
           m.image_url, m.is_new, m.created_at
    FROM matches m
    JOIN sources s ON s.id = m.source_id
    JOIN search_terms t ON t.id = m.search_term_id";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SweepError)` - Failed to open database
    pub fn new(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL lets the CLI read while a crawl in another process writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_sources(&self, filter: &str) -> StorageResult<Vec<SourceRecord>> {
        let sql = format!(
            "SELECT {} FROM sources {} ORDER BY sort_order ASC, id ASC",
            SOURCE_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let sources = stmt
            .query_map([], row_to_source)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn query_terms(&self, filter: &str) -> StorageResult<Vec<SearchTerm>> {
        let sql = format!(
            "SELECT {} FROM search_terms {} ORDER BY sort_order ASC, id ASC",
            TERM_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let terms = stmt
            .query_map([], row_to_search_term)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(terms)
    }

    fn query_matches(&self, tail: &str) -> StorageResult<Vec<StoredMatch>> {
        let sql = format!("{} {}", MATCH_QUERY, tail);
        let mut stmt = self.conn.prepare(&sql)?;
        let matches = stmt
            .query_map([], row_to_match)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(matches)
    }

    /// Swaps `id` with its closest neighbour in `table`'s sort order
    ///
    /// Returns false when there is no neighbour in that direction.
    fn swap_sort_order(
        &mut self,
        table: &str,
        entity: &'static str,
        id: i64,
        up: bool,
    ) -> StorageResult<bool> {
        let tx = self.conn.transaction()?;

        let current: i64 = tx
            .query_row(
                &format!("SELECT sort_order FROM {} WHERE id = ?1", table),
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::NotFound { entity, id })?;

        let (cmp, order) = if up { ("<", "DESC") } else { (">", "ASC") };
        let neighbour: Option<(i64, i64)> = tx
            .query_row(
                &format!(
                    "SELECT id, sort_order FROM {} WHERE sort_order {} ?1
                     ORDER BY sort_order {}, id {} LIMIT 1",
                    table, cmp, order, order
                ),
                params![current],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (other_id, other_order) = match neighbour {
            Some(n) => n,
            None => return Ok(false),
        };

        let sql = format!("UPDATE {} SET sort_order = ?1 WHERE id = ?2", table);
        tx.execute(&sql, params![other_order, id])?;
        tx.execute(&sql, params![current, other_id])?;
        tx.commit()?;
        Ok(true)
    }
}

/// Looks up a term by text, ignoring case for all letters
///
/// `COLLATE NOCASE` only folds ASCII, so "Ärmel" and "ärmel" are compared
/// here instead.
fn find_term_ignoring_case(
    conn: &Connection,
    table: &str,
    term: &str,
) -> StorageResult<Option<i64>> {
    let wanted = term.to_lowercase();
    let mut stmt = conn.prepare(&format!("SELECT id, term FROM {}", table))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

    for row in rows {
        let (id, existing) = row?;
        if existing.to_lowercase() == wanted {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<SourceRecord> {
    Ok(SourceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url: row.get(2)?,
        is_active: row.get(3)?,
        sort_order: row.get(4)?,
        last_crawl_at: row.get(5)?,
        last_error: row.get(6)?,
    })
}

fn row_to_search_term(row: &Row<'_>) -> rusqlite::Result<SearchTerm> {
    Ok(SearchTerm {
        id: row.get(0)?,
        term: row.get(1)?,
        mode: MatchMode::from_db_string(&row.get::<_, String>(2)?),
        is_active: row.get(3)?,
        sort_order: row.get(4)?,
        hide_seen_matches: row.get(5)?,
    })
}

fn row_to_match(row: &Row<'_>) -> rusqlite::Result<StoredMatch> {
    Ok(StoredMatch {
        id: row.get(0)?,
        source: row.get(1)?,
        search_term_id: row.get(2)?,
        search_term: row.get(3)?,
        title: row.get(4)?,
        price: row.get(5)?,
        url: row.get(6)?,
        image_url: row.get(7)?,
        is_new: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_crawl_log(row: &Row<'_>) -> rusqlite::Result<CrawlLogRecord> {
    let failed_sources: String = row.get(11)?;
    Ok(CrawlLogRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        completed_at: row.get(2)?,
        status: CrawlStatus::from_db_string(&row.get::<_, String>(3)?)
            .unwrap_or(CrawlStatus::Failed),
        trigger: Trigger::from_db_string(&row.get::<_, String>(4)?).unwrap_or(Trigger::Manual),
        sources_attempted: row.get(5)?,
        sources_succeeded: row.get(6)?,
        sources_failed: row.get(7)?,
        total_listings: row.get(8)?,
        new_matches: row.get(9)?,
        duplicate_matches: row.get(10)?,
        failed_sources: serde_json::from_str(&failed_sources).unwrap_or_default(),
        duration_seconds: row.get(12)?,
        config_hash: row.get(13)?,
    })
}

fn not_found(entity: &'static str, id: i64, changed: usize) -> StorageResult<()> {
    if changed == 0 {
        Err(StorageError::NotFound { entity, id })
    } else {
        Ok(())
    }
}

impl Storage for SqliteStorage {
    // ===== Sources =====

    fn ensure_source(&mut self, name: &str, base_url: &str) -> StorageResult<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM sources WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO sources (name, base_url, is_active, sort_order)
             VALUES (?1, ?2, 1, (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM sources))",
            params![name, base_url],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_active_sources(&self) -> StorageResult<Vec<SourceRecord>> {
        self.query_sources("WHERE is_active = 1")
    }

    fn get_all_sources(&self) -> StorageResult<Vec<SourceRecord>> {
        self.query_sources("")
    }

    fn set_source_active(&mut self, source_id: i64, active: bool) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE sources SET is_active = ?1 WHERE id = ?2",
            params![active, source_id],
        )?;
        not_found("Source", source_id, changed)
    }

    fn move_source_up(&mut self, source_id: i64) -> StorageResult<bool> {
        self.swap_sort_order("sources", "Source", source_id, true)
    }

    fn move_source_down(&mut self, source_id: i64) -> StorageResult<bool> {
        self.swap_sort_order("sources", "Source", source_id, false)
    }

    fn update_source_status(&mut self, source_id: i64, error: Option<&str>) -> StorageResult<()> {
        let changed = match error {
            None => self.conn.execute(
                "UPDATE sources SET last_crawl_at = ?1, last_error = NULL WHERE id = ?2",
                params![Utc::now().to_rfc3339(), source_id],
            )?,
            Some(message) => self.conn.execute(
                "UPDATE sources SET last_error = ?1 WHERE id = ?2",
                params![message, source_id],
            )?,
        };
        not_found("Source", source_id, changed)
    }

    // ===== Search Terms =====

    fn get_active_search_terms(&self) -> StorageResult<Vec<SearchTerm>> {
        self.query_terms("WHERE is_active = 1")
    }

    fn get_all_search_terms(&self) -> StorageResult<Vec<SearchTerm>> {
        self.query_terms("")
    }

    fn create_search_term(&mut self, term: &str, mode: MatchMode) -> StorageResult<i64> {
        let term = term.trim();
        if term.is_empty() {
            return Err(StorageError::ConstraintViolation(
                "search term must not be empty".to_string(),
            ));
        }

        if find_term_ignoring_case(&self.conn, "search_terms", term)?.is_some() {
            return Err(StorageError::ConstraintViolation(format!(
                "search term '{}' already exists",
                term
            )));
        }

        self.conn.execute(
            "INSERT INTO search_terms (term, match_type, is_active, sort_order, created_at)
             VALUES (?1, ?2, 1, (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM search_terms), ?3)",
            params![term, mode.to_db_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn set_search_term_active(&mut self, term_id: i64, active: bool) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE search_terms SET is_active = ?1 WHERE id = ?2",
            params![active, term_id],
        )?;
        not_found("Search term", term_id, changed)
    }

    fn set_search_term_mode(&mut self, term_id: i64, mode: MatchMode) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE search_terms SET match_type = ?1 WHERE id = ?2",
            params![mode.to_db_string(), term_id],
        )?;
        not_found("Search term", term_id, changed)
    }

    fn move_search_term_up(&mut self, term_id: i64) -> StorageResult<bool> {
        self.swap_sort_order("search_terms", "Search term", term_id, true)
    }

    fn move_search_term_down(&mut self, term_id: i64) -> StorageResult<bool> {
        self.swap_sort_order("search_terms", "Search term", term_id, false)
    }

    fn delete_search_term(&mut self, term_id: i64) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM matches WHERE search_term_id = ?1",
            params![term_id],
        )?;
        let changed = tx.execute("DELETE FROM search_terms WHERE id = ?1", params![term_id])?;
        tx.commit()?;
        not_found("Search term", term_id, changed)
    }

    // ===== Exclude Terms =====

    fn get_active_exclude_terms(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT term FROM exclude_terms WHERE is_active = 1 ORDER BY id ASC")?;
        let terms = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(terms)
    }

    fn get_all_exclude_terms(&self) -> StorageResult<Vec<ExcludeTerm>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, term, is_active FROM exclude_terms ORDER BY id ASC")?;
        let terms = stmt
            .query_map([], |row| {
                Ok(ExcludeTerm {
                    id: row.get(0)?,
                    term: row.get(1)?,
                    is_active: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(terms)
    }

    fn create_exclude_term(&mut self, term: &str) -> StorageResult<i64> {
        let term = term.trim();
        if term.is_empty() {
            return Err(StorageError::ConstraintViolation(
                "exclude term must not be empty".to_string(),
            ));
        }

        let inserted = if find_term_ignoring_case(&self.conn, "exclude_terms", term)?.is_some() {
            0
        } else {
            self.conn.execute(
                "INSERT OR IGNORE INTO exclude_terms (term, is_active, created_at) VALUES (?1, 1, ?2)",
                params![term, Utc::now().to_rfc3339()],
            )?
        };

        if inserted == 0 {
            return Err(StorageError::ConstraintViolation(format!(
                "exclude term '{}' already exists",
                term
            )));
        }
        Ok(self.conn.last_insert_rowid())
    }

    fn set_exclude_term_active(&mut self, term_id: i64, active: bool) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE exclude_terms SET is_active = ?1 WHERE id = ?2",
            params![active, term_id],
        )?;
        not_found("Exclude term", term_id, changed)
    }

    fn delete_exclude_term(&mut self, term_id: i64) -> StorageResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM exclude_terms WHERE id = ?1", params![term_id])?;
        not_found("Exclude term", term_id, changed)
    }

    fn ensure_default_exclude_terms(&mut self, defaults: &[String]) -> StorageResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM exclude_terms", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for term in defaults.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if find_term_ignoring_case(&tx, "exclude_terms", term)?.is_some() {
                continue;
            }
            inserted += tx.execute(
                "INSERT OR IGNORE INTO exclude_terms (term, is_active, created_at) VALUES (?1, 1, ?2)",
                params![term, now],
            )?;
        }
        tx.commit()?;

        if inserted > 0 {
            tracing::info!("Seeded {} default exclude terms", inserted);
        }
        Ok(inserted)
    }

    // ===== Matches =====

    fn save_matches(
        &mut self,
        results: &[MatchResult],
        source_ids: &HashMap<String, i64>,
    ) -> StorageResult<(u32, u32)> {
        let known_terms: HashSet<i64> = {
            let mut stmt = self.conn.prepare("SELECT id FROM search_terms")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<HashSet<i64>, _>>()?;
            ids
        };

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut new_count = 0u32;
        let mut dup_count = 0u32;

        for result in results {
            let listing = &result.listing;
            if listing.link.is_empty() || result.search_term_id <= 0 {
                continue;
            }

            let source_id = match source_ids.get(&listing.source) {
                Some(id) => *id,
                None => {
                    tracing::warn!(
                        "Skipping match for unknown source '{}': {}",
                        listing.source,
                        listing.link
                    );
                    continue;
                }
            };

            if !known_terms.contains(&result.search_term_id) {
                tracing::warn!(
                    "Skipping match for deleted search term {} ('{}')",
                    result.search_term_id,
                    result.search_term
                );
                continue;
            }

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM matches WHERE url = ?1 AND search_term_id = ?2",
                    params![listing.link, result.search_term_id],
                    |row| row.get(0),
                )
                .optional()?;

            if exists.is_some() {
                dup_count += 1;
                continue;
            }

            // The UNIQUE(url, search_term_id) constraint still guards the pair
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO matches
                    (source_id, search_term_id, title, price, url, image_url, is_new, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
                params![
                    source_id,
                    result.search_term_id,
                    listing.title,
                    listing.price,
                    listing.link,
                    listing.image_url,
                    now
                ],
            )?;

            if inserted == 1 {
                new_count += 1;
            } else {
                dup_count += 1;
            }
        }

        tx.commit()?;
        Ok((new_count, dup_count))
    }

    fn get_new_matches(&self) -> StorageResult<Vec<StoredMatch>> {
        self.query_matches("WHERE m.is_new = 1 ORDER BY m.created_at DESC, m.id DESC")
    }

    fn get_all_matches(&self) -> StorageResult<Vec<StoredMatch>> {
        self.query_matches("ORDER BY t.sort_order ASC, m.created_at DESC, m.id DESC")
    }

    fn count_new_matches(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM matches WHERE is_new = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn mark_matches_seen(&mut self) -> StorageResult<u64> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute("UPDATE matches SET is_new = 0 WHERE is_new = 1", [])?;
        tx.execute(
            "UPDATE app_settings SET last_seen_at = ?1 WHERE id = 1",
            params![Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(changed as u64)
    }

    // ===== Crawl Logs =====

    fn create_crawl_log(&mut self, trigger: Trigger, config_hash: &str) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO crawl_logs (started_at, status, trigger_type, config_hash)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                Utc::now().to_rfc3339(),
                CrawlStatus::Running.to_db_string(),
                trigger.to_db_string(),
                config_hash
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_crawl_log(&mut self, log_id: i64, result: &CrawlResult) -> StorageResult<()> {
        let failed_sources = serde_json::to_string(&result.failed_sources)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let changed = self.conn.execute(
            "UPDATE crawl_logs SET
                completed_at = ?1, status = ?2,
                sources_attempted = ?3, sources_succeeded = ?4, sources_failed = ?5,
                total_listings = ?6, new_matches = ?7, duplicate_matches = ?8,
                failed_sources = ?9, duration_seconds = ?10
             WHERE id = ?11",
            params![
                result
                    .completed_at
                    .unwrap_or_else(Utc::now)
                    .to_rfc3339(),
                result.status.to_db_string(),
                result.sources_attempted,
                result.sources_succeeded,
                result.sources_failed,
                result.total_listings,
                result.new_matches,
                result.duplicate_matches,
                failed_sources,
                result.duration.as_secs_f64(),
                log_id
            ],
        )?;
        not_found("Crawl log", log_id, changed)
    }

    fn get_recent_crawl_logs(&self, limit: u32) -> StorageResult<Vec<CrawlLogRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, completed_at, status, trigger_type,
                    sources_attempted, sources_succeeded, sources_failed,
                    total_listings, new_matches, duplicate_matches,
                    failed_sources, duration_seconds, config_hash
             FROM crawl_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let logs = stmt
            .query_map(params![limit], row_to_crawl_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}
