/// Extracts a numeric price from marketplace price text
///
/// Handles Swiss formats with `'` as thousands separator and either `.` or
/// `,` as decimal separator.
///
/// # Rules
///
/// | Input | Result |
/// |-------|--------|
/// | empty, or contains "anfrage" (price on request) | `None` |
/// | `.` and `,` both present | `,` is decimal, `.` is thousands |
/// | only `,` | `,` is decimal |
/// | only `.` with exactly three digits after it | `.` is thousands |
/// | anything that still doesn't parse | `None` |
///
/// # Examples
///
/// ```
/// use market_sweep::scraper::parse_price;
///
/// assert_eq!(parse_price("CHF 1'234.50"), Some(1234.5));
/// assert_eq!(parse_price("1.550CHF"), Some(1550.0));
/// assert_eq!(parse_price("Preis auf Anfrage"), None);
/// ```
pub fn parse_price(text: &str) -> Option<f64> {
    if text.trim().is_empty() || text.to_lowercase().contains("anfrage") {
        return None;
    }

    let mut cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '\''))
        .filter(|c| *c != '\'')
        .collect();

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');

    if has_dot && has_comma {
        cleaned = cleaned.replace('.', "").replace(',', ".");
    } else if has_comma {
        cleaned = cleaned.replace(',', ".");
    } else if has_dot && is_thousands_dot(&cleaned) {
        cleaned = cleaned.replace('.', "");
    }

    cleaned.parse::<f64>().ok()
}

/// True for `<digits>.<three digits>`, e.g. "1.550"
fn is_thousands_dot(s: &str) -> bool {
    match s.split_once('.') {
        Some((int, frac)) => {
            !int.is_empty()
                && int.chars().all(|c| c.is_ascii_digit())
                && frac.len() == 3
                && frac.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
