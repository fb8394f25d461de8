//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlMonitor`: shared handle the orchestrator writes run progress into
//!   and any caller can poll or use to request cancellation
//! - `CrawlState`: detached snapshot returned to pollers
//! - `CrawlStatus` / `Trigger`: run outcome and run origin

mod crawl_state;
mod status;

// Re-export main types
pub use crawl_state::{CrawlMonitor, CrawlState};
pub use status::{CrawlStatus, Trigger};
