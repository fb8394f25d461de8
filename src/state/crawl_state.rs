use crate::crawler::CrawlResult;
use chrono::Local;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Point-in-time copy of the crawl progress, safe to hand to any caller
#[derive(Debug, Clone, Default)]
pub struct CrawlState {
    pub is_running: bool,
    pub cancel_requested: bool,
    /// Source currently being scraped
    pub current_source: Option<String>,
    /// Timestamped progress lines of the current or last run
    pub log_messages: Vec<String>,
    pub last_result: Option<CrawlResult>,
}

#[derive(Debug, Default)]
struct Inner {
    is_running: bool,
    current_source: Option<String>,
    log_messages: Vec<String>,
    last_result: Option<CrawlResult>,
    cancel: CancellationToken,
}

/// Shared handle onto the process-wide crawl state
///
/// Clones share the same state. Readers (progress polling, cancellation
/// requests) can use it from any thread while the orchestrator, the only
/// writer of run progress, updates it.
#[derive(Debug, Clone, Default)]
pub struct CrawlMonitor {
    inner: Arc<Mutex<Inner>>,
}

impl CrawlMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running
    }

    /// Returns a snapshot of the whole state
    pub fn state(&self) -> CrawlState {
        let inner = self.lock();
        CrawlState {
            is_running: inner.is_running,
            cancel_requested: inner.cancel.is_cancelled(),
            current_source: inner.current_source.clone(),
            log_messages: inner.log_messages.clone(),
            last_result: inner.last_result.clone(),
        }
    }

    pub fn last_result(&self) -> Option<CrawlResult> {
        self.lock().last_result.clone()
    }

    pub fn current_source(&self) -> Option<String> {
        self.lock().current_source.clone()
    }

    /// Asks the running crawl to stop before its next source
    ///
    /// Returns false (and does nothing) if no crawl is running.
    pub fn request_cancel(&self) -> bool {
        let inner = self.lock();
        if !inner.is_running {
            return false;
        }
        inner.cancel.cancel();
        tracing::info!("Crawl cancellation requested");
        true
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.lock().cancel.is_cancelled()
    }

    /// Token of the current run, handed to scrapers
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lock().cancel.clone()
    }

    /// Appends a `[HH:MM:SS]`-prefixed progress line
    pub fn append_log(&self, message: impl AsRef<str>) {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message.as_ref());
        self.lock().log_messages.push(line);
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log_messages.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log_messages.clear();
    }

    /// Marks a run as started unless one already is
    ///
    /// Installs a fresh cancellation token, clears the current source and
    /// the log, and writes the "started" entry.
    pub(crate) fn try_begin(&self) -> Option<CancellationToken> {
        let mut inner = self.lock();
        if inner.is_running {
            return None;
        }

        inner.is_running = true;
        inner.cancel = CancellationToken::new();
        inner.current_source = None;
        inner.log_messages.clear();
        drop(inner);

        self.append_log("Crawl started");
        Some(self.cancellation_token())
    }

    pub(crate) fn set_current_source(&self, source: Option<&str>) {
        self.lock().current_source = source.map(str::to_string);
    }

    pub(crate) fn set_last_result(&self, result: CrawlResult) {
        self.lock().last_result = Some(result);
    }

    /// Returns to idle; the log and last result are kept for readers
    pub(crate) fn finish(&self) {
        let mut inner = self.lock();
        inner.is_running = false;
        inner.current_source = None;
        inner.cancel = CancellationToken::new();
    }
}
