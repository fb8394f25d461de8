/// Normalizes text for similar matching
///
/// # Normalization Steps
///
/// 1. Lowercase the text
/// 2. Drop every hyphen and whitespace character, so runs of them collapse
///    to nothing
///
/// This lets "VZ61", "VZ-61" and "VZ 61" all compare equal. The result is
/// idempotent: normalizing a normalized string returns it unchanged.
///
/// # Examples
///
/// ```
/// use market_sweep::matching::normalize;
///
/// assert_eq!(normalize("VZ-61"), "vz61");
/// assert_eq!(normalize("SIG  550"), "sig550");
/// assert_eq!(normalize(""), "");
/// ```
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect()
}
