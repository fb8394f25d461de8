use crate::state::{CrawlStatus, Trigger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Summary of one crawl run
///
/// `sources_attempted == sources_succeeded + sources_failed + sources_interrupted`
/// holds for every finished run; sources skipped because of cancellation are
/// not counted at all.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub trigger: Trigger,
    pub status: CrawlStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub sources_attempted: u32,
    pub sources_succeeded: u32,
    pub sources_failed: u32,
    /// Sources whose scraper stopped on a cancel request without results
    pub sources_interrupted: u32,
    /// Listings returned by all successful sources, before matching
    pub total_listings: u32,
    pub new_matches: u32,
    pub duplicate_matches: u32,
    /// Names of failed sources, in crawl order
    pub failed_sources: Vec<String>,
}

impl CrawlResult {
    pub fn new(trigger: Trigger, started_at: DateTime<Utc>) -> Self {
        Self {
            trigger,
            status: CrawlStatus::Running,
            started_at,
            completed_at: None,
            duration: Duration::ZERO,
            sources_attempted: 0,
            sources_succeeded: 0,
            sources_failed: 0,
            sources_interrupted: 0,
            total_listings: 0,
            new_matches: 0,
            duplicate_matches: 0,
            failed_sources: Vec::new(),
        }
    }

    pub fn record_success(&mut self, listings: usize) {
        self.sources_attempted += 1;
        self.sources_succeeded += 1;
        self.total_listings += listings as u32;
    }

    pub fn record_failure(&mut self, source: &str) {
        self.sources_attempted += 1;
        self.sources_failed += 1;
        self.failed_sources.push(source.to_string());
    }

    /// Counts a source cut short by cancellation; it is neither failed nor
    /// successful
    pub fn record_interrupted(&mut self) {
        self.sources_attempted += 1;
        self.sources_interrupted += 1;
    }

    /// Stamps completion time and derives the final status
    ///
    /// `stopped_early` is true when cancellation kept work from running,
    /// either remaining sources or the rest of the current one.
    pub fn finish(&mut self, elapsed: Duration, stopped_early: bool) {
        self.completed_at = Some(Utc::now());
        self.duration = elapsed;
        self.status = CrawlStatus::from_counts(
            self.sources_attempted,
            self.sources_succeeded,
            self.sources_failed,
            stopped_early,
        );
    }

    /// True when sources failed and none succeeded
    pub fn is_complete_failure(&self) -> bool {
        self.sources_failed > 0 && self.sources_succeeded == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_stay_consistent() {
        let mut result = CrawlResult::new(Trigger::Cli, Utc::now());
        result.record_success(12);
        result.record_failure("broken.ch");
        result.record_success(3);
        result.finish(Duration::from_secs(2), false);

        assert_eq!(result.sources_attempted, 3);
        assert_eq!(
            result.sources_attempted,
            result.sources_succeeded + result.sources_failed + result.sources_interrupted
        );
        assert_eq!(result.total_listings, 15);
        assert_eq!(result.failed_sources, vec!["broken.ch"]);
        assert_eq!(result.status, CrawlStatus::Partial);
        assert!(result.completed_at.is_some());
        assert!(!result.is_complete_failure());
    }

    #[test]
    fn test_empty_run() {
        let mut result = CrawlResult::new(Trigger::Cron, Utc::now());
        result.finish(Duration::ZERO, false);

        assert_eq!(result.status, CrawlStatus::NoSources);
        assert!(!result.is_complete_failure());
    }

    #[test]
    fn test_all_failed() {
        let mut result = CrawlResult::new(Trigger::Manual, Utc::now());
        result.record_failure("a.ch");
        result.finish(Duration::ZERO, false);

        assert_eq!(result.status, CrawlStatus::Failed);
        assert!(result.is_complete_failure());
    }

    #[test]
    fn test_interrupted_source_is_not_a_failure() {
        let mut result = CrawlResult::new(Trigger::Manual, Utc::now());
        result.record_success(4);
        result.record_interrupted();
        result.finish(Duration::ZERO, true);

        assert_eq!(result.sources_attempted, 2);
        assert_eq!(
            result.sources_attempted,
            result.sources_succeeded + result.sources_failed + result.sources_interrupted
        );
        assert!(result.failed_sources.is_empty());
        assert_eq!(result.status, CrawlStatus::Cancelled);
        assert!(!result.is_complete_failure());
    }
}
