//! Crawler module: runs the configured sources as one crawl
//!
//! This module contains the crawl orchestration logic, including:
//! - Run preparation under the cross-process lock
//! - Sequential per-source scraping with failure isolation
//! - Matching and persistence of each source's listings
//! - The run summary (`CrawlResult`)

mod orchestrator;
mod result;

pub use orchestrator::{ActiveRun, Orchestrator};
pub use result::CrawlResult;

use crate::lock::LockError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that stop a crawl as a whole
///
/// Per-source failures never show up here; they are recorded in the
/// `CrawlResult`.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("A crawl is already running in this process")]
    AlreadyRunning,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl CrawlError {
    /// True if the crawl didn't start because another one is active
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CrawlError::AlreadyRunning
                | CrawlError::Lock(LockError::Held(_) | LockError::Contended(_))
        )
    }
}
