//! Run status and trigger definitions for crawl bookkeeping
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a crawl invocation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Started from the web UI
    Manual,
    /// Started by hand from the command line
    Cli,
    /// Started by a scheduled job
    Cron,
}

impl Trigger {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Cli => "cli",
            Self::Cron => "cron",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "cli" => Some(Self::Cli),
            "cron" | "cronjob" => Some(Self::Cron),
            _ => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.to_db_string())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(&s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown trigger '{}', expected manual, cli or cron", s))
    }
}

/// Outcome of a crawl run as stored in the crawl log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    /// Crawl log row created, run not finished yet
    Running,
    /// Every attempted source succeeded
    Success,
    /// Some sources succeeded, some failed
    Partial,
    /// Every attempted source failed, or the run aborted
    Failed,
    /// Cancellation kept work from running
    Cancelled,
    /// There was nothing to crawl
    NoSources,
}

impl CrawlStatus {
    /// Derives the final status from the run counters
    ///
    /// A run that cancellation cut short is `Cancelled`; otherwise the empty
    /// run, then the success/failure split. A cancel request that arrives
    /// while the last source finishes normally doesn't count.
    pub fn from_counts(attempted: u32, succeeded: u32, failed: u32, stopped_early: bool) -> Self {
        if stopped_early {
            Self::Cancelled
        } else if attempted == 0 {
            Self::NoSources
        } else if failed == 0 {
            Self::Success
        } else if succeeded > 0 {
            Self::Partial
        } else {
            Self::Failed
        }
    }

    /// Returns true once the run is over
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::NoSources => "no_sources",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "no_sources" => Some(Self::NoSources),
            _ => None,
        }
    }

    /// Human-readable status text shown to users
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::NoSources => "no sources",
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.status_text())
    }
}
