//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Market-Sweep database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Marketplaces that get crawled
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    base_url TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    sort_order INTEGER NOT NULL DEFAULT 0,
    last_crawl_at TEXT,
    last_error TEXT
);

-- What the user is looking for
CREATE TABLE IF NOT EXISTS search_terms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    term TEXT NOT NULL UNIQUE COLLATE NOCASE,
    match_type TEXT NOT NULL DEFAULT 'exact',
    is_active INTEGER NOT NULL DEFAULT 1,
    sort_order INTEGER NOT NULL DEFAULT 0,
    hide_seen_matches INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

-- Titles containing one of these are never matched
CREATE TABLE IF NOT EXISTS exclude_terms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    term TEXT NOT NULL UNIQUE COLLATE NOCASE,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

-- One row per (listing url, search term)
CREATE TABLE IF NOT EXISTS matches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    search_term_id INTEGER NOT NULL REFERENCES search_terms(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    price REAL,
    url TEXT NOT NULL,
    image_url TEXT,
    is_new INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE(url, search_term_id)
);

CREATE INDEX IF NOT EXISTS idx_matches_term ON matches(search_term_id);
CREATE INDEX IF NOT EXISTS idx_matches_new ON matches(is_new);

-- Crawl history
CREATE TABLE IF NOT EXISTS crawl_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    sources_attempted INTEGER NOT NULL DEFAULT 0,
    sources_succeeded INTEGER NOT NULL DEFAULT 0,
    sources_failed INTEGER NOT NULL DEFAULT 0,
    total_listings INTEGER NOT NULL DEFAULT 0,
    new_matches INTEGER NOT NULL DEFAULT 0,
    duplicate_matches INTEGER NOT NULL DEFAULT 0,
    failed_sources TEXT NOT NULL DEFAULT '[]',
    duration_seconds REAL,
    config_hash TEXT NOT NULL
);

-- Single-row settings
CREATE TABLE IF NOT EXISTS app_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_seen_at TEXT
);

INSERT OR IGNORE INTO app_settings (id, last_seen_at) VALUES (1, NULL);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());

        let settings: i64 = conn
            .query_row("SELECT COUNT(*) FROM app_settings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(settings, 1);
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let tables = vec![
            "sources",
            "search_terms",
            "exclude_terms",
            "matches",
            "crawl_logs",
            "app_settings",
        ];

        for table in tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_match_pair_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO sources (name, base_url) VALUES ('s', 'https://s.ch');
             INSERT INTO search_terms (term, created_at) VALUES ('K31', 'now');",
        )
        .unwrap();

        let insert = "INSERT INTO matches (source_id, search_term_id, title, url, created_at)
                      VALUES (1, 1, 'K31', 'https://s.ch/1', 'now')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
