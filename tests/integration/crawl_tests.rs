//! Integration tests for the crawl orchestrator
//!
//! These tests run complete crawls against in-memory fake scrapers (and one
//! wiremock-backed HTML source) with a real SQLite database and lock file.

use async_trait::async_trait;
use market_sweep::config::Config;
use market_sweep::crawler::{CrawlError, Orchestrator};
use market_sweep::lock::{CrawlLock, LockError};
use market_sweep::matching::MatchMode;
use market_sweep::scraper::{ListingRecord, ScrapeContext, ScrapeError, Scraper, SourceRegistry};
use market_sweep::state::{CrawlMonitor, CrawlStatus, Trigger};
use market_sweep::storage::{SqliteStorage, Storage};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Returns a fixed set of listings
struct FixedScraper {
    listings: Vec<ListingRecord>,
    calls: Arc<AtomicUsize>,
}

impl FixedScraper {
    fn new(listings: Vec<ListingRecord>) -> Self {
        Self {
            listings,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Scraper for FixedScraper {
    async fn scrape(&self, _ctx: &ScrapeContext) -> Result<Vec<ListingRecord>, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.listings.clone())
    }
}

struct FailingScraper;

#[async_trait]
impl Scraper for FailingScraper {
    async fn scrape(&self, _ctx: &ScrapeContext) -> Result<Vec<ListingRecord>, ScrapeError> {
        Err(ScrapeError::Other("unexpected page layout".to_string()))
    }
}

struct PanickingScraper;

#[async_trait]
impl Scraper for PanickingScraper {
    async fn scrape(&self, _ctx: &ScrapeContext) -> Result<Vec<ListingRecord>, ScrapeError> {
        panic!("selector returned nothing")
    }
}

/// Requests cancellation of the running crawl, then returns its listings
struct CancellingScraper {
    monitor: CrawlMonitor,
    listings: Vec<ListingRecord>,
}

#[async_trait]
impl Scraper for CancellingScraper {
    async fn scrape(&self, _ctx: &ScrapeContext) -> Result<Vec<ListingRecord>, ScrapeError> {
        assert!(self.monitor.request_cancel());
        Ok(self.listings.clone())
    }
}

/// Requests cancellation and gives up without results, like a scraper
/// checking the token between pages
struct StoppingScraper {
    monitor: CrawlMonitor,
}

#[async_trait]
impl Scraper for StoppingScraper {
    async fn scrape(&self, ctx: &ScrapeContext) -> Result<Vec<ListingRecord>, ScrapeError> {
        assert!(self.monitor.request_cancel());
        assert!(ctx.is_cancel_requested());
        Err(ScrapeError::Cancelled)
    }
}

fn listing(title: &str, link: &str, source: &str) -> ListingRecord {
    ListingRecord::new(title, link, source).with_price(850.0)
}

struct Harness {
    dir: TempDir,
    lock_path: PathBuf,
    monitor: CrawlMonitor,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("crawl.lock");
        Self {
            dir,
            lock_path,
            monitor: CrawlMonitor::new(),
        }
    }

    fn orchestrator(&self, registry: SourceRegistry) -> Orchestrator<SqliteStorage> {
        self.orchestrator_with(SqliteStorage::new_in_memory().unwrap(), registry)
    }

    /// Database file for tests that also need a second connection to it
    fn db_path(&self) -> PathBuf {
        self.dir.path().join("sweep.db")
    }

    fn orchestrator_with(
        &self,
        mut storage: SqliteStorage,
        registry: SourceRegistry,
    ) -> Orchestrator<SqliteStorage> {
        storage.create_search_term("Glock 17", MatchMode::Exact).unwrap();
        storage.create_search_term("VZ-61", MatchMode::Similar).unwrap();
        storage
            .ensure_default_exclude_terms(&["Airsoft".to_string()])
            .unwrap();

        Orchestrator::new(
            storage,
            registry,
            CrawlLock::new(&self.lock_path),
            self.monitor.clone(),
        )
        .with_config_hash("test-hash")
    }
}

#[tokio::test]
async fn test_failing_source_is_isolated() {
    let harness = Harness::new();
    let registry = SourceRegistry::new()
        .register(
            "alpha.ch",
            "https://alpha.ch",
            Arc::new(FixedScraper::new(vec![
                listing("Glock 17 Gen5", "https://alpha.ch/1", "alpha.ch"),
                listing("K31 Karabiner", "https://alpha.ch/2", "alpha.ch"),
            ])),
        )
        .register("broken.ch", "https://broken.ch", Arc::new(FailingScraper))
        .register(
            "gamma.ch",
            "https://gamma.ch",
            Arc::new(FixedScraper::new(vec![listing(
                "Pistole VZ 61 Skorpion",
                "https://gamma.ch/9",
                "gamma.ch",
            )])),
        );
    let mut orchestrator = harness.orchestrator(registry);

    let result = orchestrator.run(Trigger::Cli).await.unwrap();

    assert_eq!(result.sources_attempted, 3);
    assert_eq!(result.sources_succeeded, 2);
    assert_eq!(result.sources_failed, 1);
    assert_eq!(result.failed_sources, vec!["broken.ch"]);
    assert_eq!(result.status, CrawlStatus::Partial);
    assert_eq!(result.total_listings, 3);
    assert_eq!(result.new_matches, 2);
    assert_eq!(result.duplicate_matches, 0);

    let sources = orchestrator.storage().get_all_sources().unwrap();
    let broken = sources.iter().find(|s| s.name == "broken.ch").unwrap();
    assert_eq!(
        broken.last_error.as_deref(),
        Some("Error: unexpected page layout")
    );
    assert!(broken.last_crawl_at.is_none());
    let alpha = sources.iter().find(|s| s.name == "alpha.ch").unwrap();
    assert!(alpha.last_error.is_none());
    assert!(alpha.last_crawl_at.is_some());

    // Cleanup happened
    assert!(!orchestrator.is_running());
    assert!(!harness.lock_path.exists());
    assert_eq!(
        orchestrator.get_last_result().unwrap().status,
        CrawlStatus::Partial
    );
}

#[tokio::test]
async fn test_panicking_source_is_isolated() {
    let harness = Harness::new();
    let registry = SourceRegistry::new()
        .register("panics.ch", "https://panics.ch", Arc::new(PanickingScraper))
        .register(
            "alpha.ch",
            "https://alpha.ch",
            Arc::new(FixedScraper::new(vec![listing(
                "Glock 17",
                "https://alpha.ch/1",
                "alpha.ch",
            )])),
        );
    let mut orchestrator = harness.orchestrator(registry);

    let result = orchestrator.run(Trigger::Cron).await.unwrap();

    assert_eq!(result.sources_attempted, 2);
    assert_eq!(result.failed_sources, vec!["panics.ch"]);
    assert_eq!(result.new_matches, 1);

    let sources = orchestrator.storage().get_all_sources().unwrap();
    let panics = sources.iter().find(|s| s.name == "panics.ch").unwrap();
    assert_eq!(
        panics.last_error.as_deref(),
        Some("Panic: selector returned nothing")
    );
}

#[tokio::test]
async fn test_all_sources_failing_is_failed() {
    let harness = Harness::new();
    let registry = SourceRegistry::new()
        .register("a.ch", "https://a.ch", Arc::new(FailingScraper))
        .register("b.ch", "https://b.ch", Arc::new(FailingScraper));
    let mut orchestrator = harness.orchestrator(registry);

    let result = orchestrator.run(Trigger::Cli).await.unwrap();

    assert_eq!(result.status, CrawlStatus::Failed);
    assert!(result.is_complete_failure());
}

#[tokio::test]
async fn test_cancel_after_first_source() {
    let harness = Harness::new();
    let second = FixedScraper::new(vec![listing("Glock 17", "https://b.ch/1", "b.ch")]);
    let second_calls = second.calls.clone();

    let registry = SourceRegistry::new()
        .register(
            "a.ch",
            "https://a.ch",
            Arc::new(CancellingScraper {
                monitor: harness.monitor.clone(),
                listings: vec![listing("Glock 17", "https://a.ch/1", "a.ch")],
            }),
        )
        .register("b.ch", "https://b.ch", Arc::new(second))
        .register("c.ch", "https://c.ch", Arc::new(FailingScraper));
    let mut orchestrator = harness.orchestrator(registry);

    let result = orchestrator.run(Trigger::Manual).await.unwrap();

    assert_eq!(result.sources_attempted, 1);
    assert_eq!(result.sources_succeeded, 1);
    assert_eq!(result.status, CrawlStatus::Cancelled);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    // The first source's matches were still stored
    assert_eq!(result.new_matches, 1);

    let log = orchestrator.get_log();
    assert!(log.iter().any(|line| line.ends_with("Crawl cancelled")));

    // Cancellation does not leak into the next run
    assert!(!orchestrator.is_cancel_requested());
    assert!(!orchestrator.request_cancel());
}

#[tokio::test]
async fn test_cancel_during_last_source_keeps_status() {
    let harness = Harness::new();
    let registry = SourceRegistry::new()
        .register(
            "a.ch",
            "https://a.ch",
            Arc::new(FixedScraper::new(vec![listing("Glock 17", "https://a.ch/1", "a.ch")])),
        )
        .register(
            "b.ch",
            "https://b.ch",
            Arc::new(CancellingScraper {
                monitor: harness.monitor.clone(),
                listings: vec![listing("Glock 17", "https://b.ch/1", "b.ch")],
            }),
        );
    let mut orchestrator = harness.orchestrator(registry);

    let result = orchestrator.run(Trigger::Manual).await.unwrap();

    // Nothing was left to skip, so the run simply finished
    assert_eq!(result.sources_attempted, 2);
    assert_eq!(result.sources_succeeded, 2);
    assert_eq!(result.status, CrawlStatus::Success);
    assert_eq!(result.new_matches, 2);
    assert!(!orchestrator.is_cancel_requested());
}

#[tokio::test]
async fn test_source_stopped_by_cancel_is_not_failed() {
    let harness = Harness::new();
    let third = FixedScraper::new(vec![listing("Glock 17", "https://c.ch/1", "c.ch")]);
    let third_calls = third.calls.clone();

    let registry = SourceRegistry::new()
        .register(
            "a.ch",
            "https://a.ch",
            Arc::new(FixedScraper::new(vec![listing("Glock 17", "https://a.ch/1", "a.ch")])),
        )
        .register(
            "b.ch",
            "https://b.ch",
            Arc::new(StoppingScraper {
                monitor: harness.monitor.clone(),
            }),
        )
        .register("c.ch", "https://c.ch", Arc::new(third));
    let mut orchestrator = harness.orchestrator(registry);

    let result = orchestrator.run(Trigger::Manual).await.unwrap();

    assert_eq!(result.sources_attempted, 2);
    assert_eq!(result.sources_succeeded, 1);
    assert_eq!(result.sources_failed, 0);
    assert_eq!(result.sources_interrupted, 1);
    assert!(result.failed_sources.is_empty());
    assert_eq!(result.status, CrawlStatus::Cancelled);
    assert!(!result.is_complete_failure());
    assert_eq!(third_calls.load(Ordering::SeqCst), 0);

    // A healthy site keeps a clean status
    let sources = orchestrator.storage().get_all_sources().unwrap();
    let stopped = sources.iter().find(|s| s.name == "b.ch").unwrap();
    assert!(stopped.last_error.is_none());
}

#[tokio::test]
async fn test_persistence_failure_fails_only_that_source() {
    let harness = Harness::new();
    let storage = SqliteStorage::new(&harness.db_path()).unwrap();
    Connection::open(harness.db_path())
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_b_matches BEFORE INSERT ON matches
             WHEN NEW.source_id = (SELECT id FROM sources WHERE name = 'b.ch')
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

    let registry = SourceRegistry::new()
        .register(
            "a.ch",
            "https://a.ch",
            Arc::new(FixedScraper::new(vec![listing("Glock 17", "https://a.ch/1", "a.ch")])),
        )
        .register(
            "b.ch",
            "https://b.ch",
            Arc::new(FixedScraper::new(vec![listing("Glock 17", "https://b.ch/1", "b.ch")])),
        )
        .register(
            "c.ch",
            "https://c.ch",
            Arc::new(FixedScraper::new(vec![listing("Glock 17", "https://c.ch/1", "c.ch")])),
        );
    let mut orchestrator = harness.orchestrator_with(storage, registry);

    let result = orchestrator.run(Trigger::Cli).await.unwrap();

    assert_eq!(result.sources_attempted, 3);
    assert_eq!(result.sources_succeeded, 2);
    assert_eq!(result.failed_sources, vec!["b.ch"]);
    assert_eq!(result.status, CrawlStatus::Partial);
    assert_eq!(result.total_listings, 3);
    assert_eq!(result.new_matches, 2);

    let sources = orchestrator.storage().get_all_sources().unwrap();
    let b = sources.iter().find(|s| s.name == "b.ch").unwrap();
    assert!(b.last_error.as_deref().unwrap().starts_with("persistence:"));

    let mut stored: Vec<String> = orchestrator
        .storage()
        .get_all_matches()
        .unwrap()
        .into_iter()
        .map(|m| m.source)
        .collect();
    stored.sort();
    assert_eq!(stored, vec!["a.ch", "c.ch"]);
}

#[tokio::test]
async fn test_storage_error_during_run_cleans_up() {
    let harness = Harness::new();
    let storage = SqliteStorage::new(&harness.db_path()).unwrap();
    Connection::open(harness.db_path())
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER read_only_sources BEFORE INSERT ON sources
             BEGIN SELECT RAISE(ABORT, 'read-only'); END;",
        )
        .unwrap();

    let registry = SourceRegistry::new().register(
        "a.ch",
        "https://a.ch",
        Arc::new(FixedScraper::new(vec![listing("Glock 17", "https://a.ch/1", "a.ch")])),
    );
    let mut orchestrator = harness.orchestrator_with(storage, registry);

    let err = orchestrator.run(Trigger::Cli).await.unwrap_err();
    assert!(matches!(err, CrawlError::Storage(_)));
    assert!(!err.is_conflict());

    assert!(!orchestrator.is_running());
    assert!(!harness.lock_path.exists());
    assert_eq!(
        orchestrator.get_last_result().unwrap().status,
        CrawlStatus::Failed
    );

    let logs = orchestrator.storage().get_recent_crawl_logs(5).unwrap();
    assert_eq!(logs[0].status, CrawlStatus::Failed);
}

#[tokio::test]
async fn test_no_sources() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator(SourceRegistry::new());

    let result = orchestrator.run(Trigger::Cron).await.unwrap();

    assert_eq!(result.sources_attempted, 0);
    assert_eq!(result.status, CrawlStatus::NoSources);
    assert!(!result.is_complete_failure());

    let logs = orchestrator.storage().get_recent_crawl_logs(5).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, CrawlStatus::NoSources);
    assert_eq!(logs[0].config_hash, "test-hash");
}

#[tokio::test]
async fn test_inactive_sources_are_skipped() {
    let harness = Harness::new();
    let scraper = FixedScraper::new(vec![listing("Glock 17", "https://a.ch/1", "a.ch")]);
    let calls = scraper.calls.clone();
    let registry = SourceRegistry::new().register("a.ch", "https://a.ch", Arc::new(scraper));
    let mut orchestrator = harness.orchestrator(registry);

    let id = orchestrator
        .storage_mut()
        .ensure_source("a.ch", "https://a.ch")
        .unwrap();
    orchestrator.storage_mut().set_source_active(id, false).unwrap();

    let result = orchestrator.run(Trigger::Cli).await.unwrap();

    assert_eq!(result.status, CrawlStatus::NoSources);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_active_source_without_scraper_fails() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator(SourceRegistry::new());
    orchestrator
        .storage_mut()
        .ensure_source("retired.ch", "https://retired.ch")
        .unwrap();

    let result = orchestrator.run(Trigger::Cli).await.unwrap();

    assert_eq!(result.sources_attempted, 1);
    assert_eq!(result.failed_sources, vec!["retired.ch"]);

    let source = &orchestrator.storage().get_all_sources().unwrap()[0];
    assert_eq!(source.last_error.as_deref(), Some("No scraper registered"));
}

#[tokio::test]
async fn test_lock_conflict() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator(SourceRegistry::new());

    let other = CrawlLock::new(&harness.lock_path);
    let held = other.acquire(Trigger::Cron).unwrap();

    let err = orchestrator.run(Trigger::Cli).await.unwrap_err();
    assert!(err.is_conflict());
    match err {
        CrawlError::Lock(LockError::Held(info)) => assert_eq!(info.trigger, Trigger::Cron),
        unexpected => panic!("expected lock conflict, got {:?}", unexpected),
    }

    // Nothing started
    assert!(!orchestrator.is_running());
    assert!(orchestrator.get_log().is_empty());
    assert!(orchestrator
        .storage()
        .get_recent_crawl_logs(5)
        .unwrap()
        .is_empty());

    held.release().unwrap();
    assert!(orchestrator.run(Trigger::Cli).await.is_ok());
}

#[tokio::test]
async fn test_stale_lock_is_recovered() {
    let harness = Harness::new();
    std::fs::write(
        &harness.lock_path,
        r#"{"pid":4294967288,"trigger":"cron","acquired_at":"2026-01-01T03:00:00Z"}"#,
    )
    .unwrap();

    let mut orchestrator = harness.orchestrator(SourceRegistry::new());
    let result = orchestrator.run(Trigger::Cli).await.unwrap();

    assert_eq!(result.status, CrawlStatus::NoSources);
    assert!(!harness.lock_path.exists());
}

#[tokio::test]
async fn test_prepare_rejects_second_run() {
    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator(SourceRegistry::new());

    let active = orchestrator.prepare(Trigger::Manual).unwrap();
    assert!(orchestrator.is_running());
    assert!(harness.lock_path.exists());
    assert!(orchestrator.get_state().log_messages[0].ends_with("Crawl started"));

    let err = orchestrator.prepare(Trigger::Cli).unwrap_err();
    assert!(matches!(err, CrawlError::AlreadyRunning));

    // Dropping an unexecuted run still cleans up
    drop(active);
    assert!(!orchestrator.is_running());
    assert!(!harness.lock_path.exists());

    let active = orchestrator.prepare(Trigger::Cli).unwrap();
    let result = orchestrator.execute(active).await.unwrap();
    assert_eq!(result.trigger, Trigger::Cli);
}

#[tokio::test]
async fn test_matches_are_deduplicated_across_runs() {
    let harness = Harness::new();
    let registry = SourceRegistry::new().register(
        "alpha.ch",
        "https://alpha.ch",
        Arc::new(FixedScraper::new(vec![
            listing("Glock 17 Gen5 9mm Pistole", "https://alpha.ch/1", "alpha.ch"),
            listing("CZ VZ61 Skorpion", "https://alpha.ch/2", "alpha.ch"),
        ])),
    );
    let mut orchestrator = harness.orchestrator(registry);

    let first = orchestrator.run(Trigger::Cli).await.unwrap();
    assert_eq!((first.new_matches, first.duplicate_matches), (2, 0));

    let second = orchestrator.run(Trigger::Cli).await.unwrap();
    assert_eq!((second.new_matches, second.duplicate_matches), (0, 2));

    assert_eq!(orchestrator.storage().count_new_matches().unwrap(), 2);
    assert_eq!(
        orchestrator.storage().get_recent_crawl_logs(10).unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_excluded_listings_never_match() {
    let harness = Harness::new();
    let registry = SourceRegistry::new().register(
        "alpha.ch",
        "https://alpha.ch",
        Arc::new(FixedScraper::new(vec![
            listing("Airsoft Glock 17 Replica", "https://alpha.ch/1", "alpha.ch"),
            listing("Glock 17 Gen4", "https://alpha.ch/2", "alpha.ch"),
        ])),
    );
    let mut orchestrator = harness.orchestrator(registry);

    let result = orchestrator.run(Trigger::Cli).await.unwrap();

    assert_eq!(result.total_listings, 2);
    assert_eq!(result.new_matches, 1);
    let stored = orchestrator.storage().get_new_matches().unwrap();
    assert_eq!(stored[0].url, "https://alpha.ch/2");
}

#[tokio::test]
async fn test_html_source_end_to_end() {
    let server = MockServer::start().await;
    let page_one = r#"
        <ul>
          <li class="item"><a href="/offer/1"><h3>Glock 17 Gen5</h3></a><b>CHF 650.-</b></li>
          <li class="item"><a href="/offer/2"><h3>SIG 550</h3></a><b>Auf Anfrage</b></li>
        </ul>"#;

    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_one))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<ul></ul>"))
        .mount(&server)
        .await;

    let toml = format!(
        r#"
        [crawler]
        lock-path = "./unused.lock"
        request-delay-min = 0
        request-delay-max = 0

        [database]
        path = ":memory:"

        [[source]]
        name = "mock.ch"
        base-url = "{uri}"
        listing-url = "{uri}/list?page={{page}}"

        [source.selectors]
        item = "li.item"
        title = "h3"
        link = "a"
        price = "b"
        "#,
        uri = server.uri()
    );
    let config: Config = toml::from_str(&toml).unwrap();
    let registry = SourceRegistry::from_config(&config).unwrap();

    let harness = Harness::new();
    let mut orchestrator = harness.orchestrator(registry);
    let result = orchestrator.run(Trigger::Cli).await.unwrap();

    assert_eq!(result.status, CrawlStatus::Success);
    assert_eq!(result.total_listings, 2);
    assert_eq!(result.new_matches, 1);

    let stored = orchestrator.storage().get_new_matches().unwrap();
    assert_eq!(stored[0].url, format!("{}/offer/1", server.uri()));
    assert_eq!(stored[0].price, Some(650.0));
    assert_eq!(stored[0].source, "mock.ch");
}
