use crate::matching::normalize::normalize;
use crate::matching::{MatchMode, MatchResult, MatchType, SearchTerm};
use crate::scraper::ListingRecord;

/// Checks whether `title` contains `term` as typed, ignoring case
///
/// Spacing and hyphenation of the term are kept, so "Glock 17" does not
/// match "Glock17".
///
/// # Examples
///
/// ```
/// use market_sweep::matching::matches_exact;
///
/// assert!(matches_exact("Pistole Glock 17 Gen5", "Glock 17"));
/// assert!(!matches_exact("Pistole Glock17 Gen5", "Glock 17"));
/// ```
pub fn matches_exact(title: &str, term: &str) -> bool {
    if title.is_empty() || term.is_empty() {
        return false;
    }
    title.to_lowercase().contains(&term.to_lowercase())
}

/// Checks whether the normalized title contains the normalized term
///
/// # Examples
///
/// ```
/// use market_sweep::matching::matches_similar;
///
/// assert!(matches_similar("Pistole VZ 61 Skorpion", "VZ-61"));
/// assert!(matches_similar("SIG550 Rifle", "SIG 550"));
/// ```
pub fn matches_similar(title: &str, term: &str) -> bool {
    let term = normalize(term);
    if term.is_empty() {
        return false;
    }
    normalize(title).contains(&term)
}

/// Dispatches to the matcher for `mode`
pub fn matches(title: &str, term: &str, mode: MatchMode) -> bool {
    match mode {
        MatchMode::Exact => matches_exact(title, term),
        MatchMode::Similar => matches_similar(title, term),
    }
}

/// Returns true if any exclude term occurs in the title, ignoring case
pub fn contains_exclude_term<S: AsRef<str>>(title: &str, exclude_terms: &[S]) -> bool {
    if title.is_empty() {
        return false;
    }

    let title = title.to_lowercase();
    exclude_terms.iter().any(|term| {
        let term = term.as_ref();
        !term.is_empty() && title.contains(&term.to_lowercase())
    })
}

/// Finds all (listing, search term) pairs that match
///
/// Listings without a title or containing an exclude term are skipped.
/// Every remaining listing is checked against each active term with a
/// non-empty text and a positive id, and produces one result per matching
/// term. A listing whose `found_by_term` names a term (ignoring case)
/// matches that term even when the title doesn't contain it; such results
/// carry `MatchType::FoundBySearch`, title matches carry the term's mode.
///
/// Results follow listing order, then term order.
pub fn find_matches<S: AsRef<str>>(
    listings: &[ListingRecord],
    search_terms: &[SearchTerm],
    exclude_terms: &[S],
) -> Vec<MatchResult> {
    let mut results = Vec::new();

    let active: Vec<&SearchTerm> = search_terms
        .iter()
        .filter(|t| t.is_active && t.id > 0 && !t.term.is_empty())
        .collect();

    if listings.is_empty() || active.is_empty() {
        return results;
    }

    for listing in listings {
        if listing.title.is_empty() {
            continue;
        }

        if contains_exclude_term(&listing.title, exclude_terms) {
            tracing::debug!("Excluded listing '{}'", listing.title);
            continue;
        }

        let found_by = listing.found_by_term.as_deref().map(str::to_lowercase);

        for term in &active {
            let match_type = if matches(&listing.title, &term.term, term.mode) {
                MatchType::from(term.mode)
            } else if found_by.as_deref() == Some(term.term.to_lowercase().as_str()) {
                MatchType::FoundBySearch
            } else {
                continue;
            };

            results.push(MatchResult {
                listing: listing.clone(),
                search_term_id: term.id,
                search_term: term.term.clone(),
                match_type,
            });
        }
    }

    results
}
