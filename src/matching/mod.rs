//! Matching engine
//!
//! Pure functions that decide whether a listing title satisfies a search
//! term, plus the data types the rest of the crate passes around:
//! - `SearchTerm` / `ExcludeTerm`: user-defined criteria
//! - `MatchMode`: exact (as typed) or similar (separator-insensitive)
//! - `MatchResult`: one listing matched by one term, not yet persisted
//! - `MatchType`: how that match came about

mod matcher;
mod normalize;

pub use matcher::{contains_exclude_term, find_matches, matches, matches_exact, matches_similar};
pub use normalize::normalize;

use crate::scraper::ListingRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a search term is compared against listing titles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Case-insensitive substring, spacing and hyphens kept
    #[default]
    Exact,
    /// Substring after `normalize` on both sides
    Similar,
}

impl MatchMode {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Similar => "similar",
        }
    }

    /// Parses a stored mode; anything unrecognized falls back to `Exact`
    pub fn from_db_string(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "similar" => Self::Similar,
            _ => Self::Exact,
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.to_db_string())
    }
}

/// How a listing matched a term
///
/// Title matches report the term's mode. `FoundBySearch` is only used when
/// the title itself doesn't match and the listing came back from the
/// source's own search for the term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Similar,
    FoundBySearch,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Similar => "similar",
            Self::FoundBySearch => "found_by_search",
        }
    }
}

impl From<MatchMode> for MatchType {
    fn from(mode: MatchMode) -> Self {
        match mode {
            MatchMode::Exact => Self::Exact,
            MatchMode::Similar => Self::Similar,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A user-defined search term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub id: i64,
    pub term: String,
    pub mode: MatchMode,
    pub is_active: bool,
    /// Display precedence; lower sorts first
    pub sort_order: i64,
    /// Hide matches already shown under an earlier term
    pub hide_seen_matches: bool,
}

/// A term whose presence in a title disqualifies the listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeTerm {
    pub id: i64,
    pub term: String,
    pub is_active: bool,
}

/// One listing satisfied by one search term
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub listing: ListingRecord,
    pub search_term_id: i64,
    pub search_term: String,
    pub match_type: MatchType,
}
