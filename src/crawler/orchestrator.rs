//! Crawl orchestrator - end-to-end run lifecycle
//!
//! One run goes through:
//! - Preparing: refuse if a run is active, take the cross-process lock,
//!   reset the monitor and open a crawl log row
//! - Running: scrape every active source in sort order, one at a time,
//!   matching and persisting each source's listings before the next
//! - Completion: derive the status, write the crawl log, publish the
//!   result, release the lock and return the monitor to idle
//!
//! Release and reset live in `ActiveRun::drop`, so they also happen when
//! the run errors out or panics.

use crate::config::Config;
use crate::crawler::{CrawlError, CrawlResult};
use crate::lock::{CrawlLock, LockHandle, LockInfo};
use crate::matching::{find_matches, SearchTerm};
use crate::scraper::{run_scraper, ScrapeContext, SourceRegistry};
use crate::state::{CrawlMonitor, CrawlState, Trigger};
use crate::storage::{SourceRecord, SqliteStorage, Storage};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A prepared crawl: lock held, monitor marked running
///
/// Dropping it releases the lock and resets the monitor, whether or not
/// the run was executed.
#[derive(Debug)]
pub struct ActiveRun {
    trigger: Trigger,
    started_at: DateTime<Utc>,
    start: Instant,
    cancel: CancellationToken,
    log_id: Option<i64>,
    handle: Option<LockHandle>,
    monitor: CrawlMonitor,
}

impl ActiveRun {
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Crawl log row of this run
    pub fn log_id(&self) -> Option<i64> {
        self.log_id
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.release() {
                tracing::error!("Failed to release crawl lock: {}", e);
            }
        }
        self.monitor.finish();
    }
}

/// Runs crawls against a storage backend
pub struct Orchestrator<S: Storage> {
    storage: S,
    registry: SourceRegistry,
    monitor: CrawlMonitor,
    lock: CrawlLock,
    config_hash: String,
}

impl Orchestrator<SqliteStorage> {
    /// Builds an orchestrator from a loaded configuration
    ///
    /// Opens the database, seeds default exclude terms into an empty
    /// table and registers one scraper per configured source.
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash recorded on every crawl log row
    pub fn from_config(config: &Config, config_hash: &str) -> crate::Result<Self> {
        let mut storage = SqliteStorage::new(Path::new(&config.database.path))?;
        storage.ensure_default_exclude_terms(&config.exclude_defaults)?;

        let registry = SourceRegistry::from_config(config)?;
        let lock = CrawlLock::new(&config.crawler.lock_path);

        Ok(Self::new(storage, registry, lock, CrawlMonitor::new()).with_config_hash(config_hash))
    }
}

impl<S: Storage> Orchestrator<S> {
    pub fn new(storage: S, registry: SourceRegistry, lock: CrawlLock, monitor: CrawlMonitor) -> Self {
        Self {
            storage,
            registry,
            monitor,
            lock,
            config_hash: String::new(),
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Handle for polling progress or cancelling from another task
    pub fn monitor(&self) -> CrawlMonitor {
        self.monitor.clone()
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    pub fn get_state(&self) -> CrawlState {
        self.monitor.state()
    }

    pub fn get_last_result(&self) -> Option<CrawlResult> {
        self.monitor.last_result()
    }

    pub fn request_cancel(&self) -> bool {
        self.monitor.request_cancel()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.monitor.is_cancel_requested()
    }

    pub fn append_log(&self, message: impl AsRef<str>) {
        self.monitor.append_log(message);
    }

    pub fn get_log(&self) -> Vec<String> {
        self.monitor.log()
    }

    pub fn clear_log(&self) {
        self.monitor.clear_log();
    }

    /// Current holder of the cross-process lock, if any
    pub fn lock_holder(&self) -> Option<LockInfo> {
        self.lock.holder_info()
    }

    /// Runs a complete crawl
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlResult)` - The run finished; per-source failures are in the result
    /// * `Err(CrawlError)` - Another run is active, or setup/teardown failed
    pub async fn run(&mut self, trigger: Trigger) -> Result<CrawlResult, CrawlError> {
        let active = self.prepare(trigger)?;
        self.execute(active).await
    }

    /// Enters the running state without crawling yet
    ///
    /// Synchronous, so a caller can report "started" (or the conflict)
    /// before handing the run to a background task.
    pub fn prepare(&mut self, trigger: Trigger) -> Result<ActiveRun, CrawlError> {
        if self.monitor.is_running() {
            return Err(CrawlError::AlreadyRunning);
        }

        let handle = self.lock.acquire(trigger)?;

        let cancel = match self.monitor.try_begin() {
            Some(token) => token,
            None => {
                drop(handle);
                return Err(CrawlError::AlreadyRunning);
            }
        };

        let mut run = ActiveRun {
            trigger,
            started_at: Utc::now(),
            start: Instant::now(),
            cancel,
            log_id: None,
            handle: Some(handle),
            monitor: self.monitor.clone(),
        };

        tracing::info!("Starting crawl (trigger: {})", trigger);
        run.log_id = Some(self.storage.create_crawl_log(trigger, &self.config_hash)?);
        Ok(run)
    }

    /// Crawls all active sources of a prepared run
    pub async fn execute(&mut self, run: ActiveRun) -> Result<CrawlResult, CrawlError> {
        let mut result = CrawlResult::new(run.trigger, run.started_at);

        match self.crawl_sources(&run, &mut result).await {
            Ok(stopped_early) => {
                result.finish(run.start.elapsed(), stopped_early);
                self.monitor.append_log(format!(
                    "Crawl finished: {} ({}/{} sources ok, {} new matches)",
                    result.status,
                    result.sources_succeeded,
                    result.sources_attempted,
                    result.new_matches
                ));
                tracing::info!(
                    "Crawl finished with status {} in {:.1}s",
                    result.status,
                    result.duration.as_secs_f64()
                );

                self.monitor.set_last_result(result.clone());
                if let Some(id) = run.log_id {
                    self.storage.update_crawl_log(id, &result)?;
                }
                Ok(result)
            }
            Err(e) => {
                result.finish(run.start.elapsed(), false);
                result.status = crate::state::CrawlStatus::Failed;
                tracing::error!("Crawl aborted: {}", e);
                self.monitor.append_log(format!("Crawl aborted: {}", e));
                self.monitor.set_last_result(result.clone());

                if let Some(id) = run.log_id {
                    if let Err(log_err) = self.storage.update_crawl_log(id, &result) {
                        tracing::error!("Failed to record aborted crawl: {}", log_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Returns true if cancellation cut the run short
    async fn crawl_sources(
        &mut self,
        run: &ActiveRun,
        result: &mut CrawlResult,
    ) -> Result<bool, CrawlError> {
        let source_ids = self.sync_registry()?;
        let sources = self.storage.get_active_sources()?;
        let terms = self.storage.get_active_search_terms()?;
        let excludes = self.storage.get_active_exclude_terms()?;

        if sources.is_empty() {
            tracing::info!("No active sources to crawl");
            self.monitor.append_log("No active sources to crawl");
            return Ok(false);
        }

        self.monitor.append_log(format!(
            "{} sources, {} search terms, {} exclude terms",
            sources.len(),
            terms.len(),
            excludes.len()
        ));

        let ctx = ScrapeContext::new(run.cancel.clone())
            .with_search_terms(terms.iter().map(|t| t.term.clone()).collect())
            .with_monitor(self.monitor.clone());

        let mut stopped_early = false;
        for source in &sources {
            if run.cancel.is_cancelled() {
                tracing::info!("Crawl cancelled before {}", source.name);
                self.monitor.append_log("Crawl cancelled");
                stopped_early = true;
                break;
            }

            self.monitor.set_current_source(Some(&source.name));
            self.monitor.append_log(format!("Crawling {}...", source.name));

            let interrupted = self
                .crawl_source(source, &ctx, &terms, &excludes, &source_ids, result)
                .await;
            stopped_early |= interrupted;
        }

        self.monitor.set_current_source(None);
        Ok(stopped_early)
    }

    /// Scrapes, matches and persists one source; never fails the run
    ///
    /// Returns true if the scraper gave up because of a cancel request.
    async fn crawl_source(
        &mut self,
        source: &SourceRecord,
        ctx: &ScrapeContext,
        terms: &[SearchTerm],
        excludes: &[String],
        source_ids: &HashMap<String, i64>,
        result: &mut CrawlResult,
    ) -> bool {
        let registered = match self.registry.get(&source.name) {
            Some(r) => r,
            None => {
                let message = "No scraper registered";
                tracing::warn!("{} - {}", source.name, message);
                self.fail_source(source, message, result);
                return false;
            }
        };

        let outcome = run_scraper(registered, ctx).await;

        if let Some(error) = outcome.error {
            if ctx.is_cancel_requested() {
                // Cut short by cancellation, not broken: no failure, status untouched
                tracing::info!("{} - stopped on cancel request ({})", source.name, error);
                result.record_interrupted();
                self.monitor
                    .append_log(format!("  - {} cancelled", source.name));
                return true;
            }
            self.fail_source(source, &error, result);
            return false;
        }

        let listings = outcome.listings;
        let matches = find_matches(&listings, terms, excludes);

        match self.storage.save_matches(&matches, source_ids) {
            Ok((new_count, dup_count)) => {
                result.record_success(listings.len());
                result.new_matches += new_count;
                result.duplicate_matches += dup_count;

                if let Err(e) = self.storage.update_source_status(source.id, None) {
                    tracing::warn!("{} - failed to update status: {}", source.name, e);
                }

                tracing::info!(
                    "{} - {} listings, {} matches ({} new) in {:.1}s",
                    source.name,
                    listings.len(),
                    matches.len(),
                    new_count,
                    outcome.elapsed.as_secs_f64()
                );
                self.monitor.append_log(format!(
                    "  ✓ {}: {} listings, {} new matches",
                    source.name,
                    listings.len(),
                    new_count
                ));
            }
            Err(e) => {
                result.total_listings += listings.len() as u32;
                self.fail_source(source, &format!("persistence: {}", e), result);
            }
        }
        false
    }

    fn fail_source(&mut self, source: &SourceRecord, error: &str, result: &mut CrawlResult) {
        result.record_failure(&source.name);
        tracing::error!("{} - failed: {}", source.name, error);
        self.monitor
            .append_log(format!("  ✗ {}: {}", source.name, error));

        if let Err(e) = self.storage.update_source_status(source.id, Some(error)) {
            tracing::warn!("{} - failed to record error: {}", source.name, e);
        }
    }

    /// Upserts every registered source and returns the name → id map
    fn sync_registry(&mut self) -> Result<HashMap<String, i64>, CrawlError> {
        let mut ids = HashMap::new();
        for source in self.registry.iter() {
            let id = self.storage.ensure_source(&source.name, &source.base_url)?;
            ids.insert(source.name.clone(), id);
        }

        // Sources toggled on in the database but missing from the registry
        for source in self.storage.get_all_sources()? {
            ids.entry(source.name).or_insert(source.id);
        }
        Ok(ids)
    }
}
