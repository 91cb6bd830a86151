//! Lenient cell coercion.
//!
//! Raw CSV cells are text; profiling and comparison only need to know whether
//! a cell reads as a number or a date. Neither function ever fails: a cell
//! that does not coerce simply isn't numeric (or date-like).

use chrono::{NaiveDate, NaiveDateTime};

/// Stripped before parsing: thousands separators plus currency and percent
/// markers.
const IGNORED_SYMBOLS: &[char] = &[',', '₩', '$', '€', '£', '%'];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S"];

/// Parses `raw` as a finite float. `(X)` reads as `-X`.
pub fn to_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (body, negate) = match trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (inner, true),
        None => (trimmed, false),
    };

    let cleaned = body
        .chars()
        .filter(|ch| !IGNORED_SYMBOLS.contains(ch))
        .collect::<String>();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    let value = cleaned.parse::<f64>().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negate { -value } else { value })
}

/// Parses the date layouts recognised for semantic typing and the time rule.
pub fn parse_date_like(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    None
}

pub fn looks_like_date(raw: &str) -> bool {
    parse_date_like(raw).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_number_handles_separators_symbols_and_parentheses() {
        assert_eq!(to_number("1,234.5"), Some(1234.5));
        assert_eq!(to_number("1,234.50"), Some(1234.5));
        assert_eq!(to_number("(3.2)"), Some(-3.2));
        assert_eq!(to_number("(5)"), Some(-5.0));
        assert_eq!(to_number("$100"), Some(100.0));
        assert_eq!(to_number("₩1000"), Some(1000.0));
        assert_eq!(to_number("12.5%"), Some(12.5));
        assert_eq!(to_number(" €7 "), Some(7.0));
    }

    #[test]
    fn to_number_rejects_blank_and_text() {
        assert_eq!(to_number(""), None);
        assert_eq!(to_number("   "), None);
        assert_eq!(to_number("$"), None);
        assert_eq!(to_number("()"), None);
        assert_eq!(to_number("hello"), None);
        assert_eq!(to_number("10kg"), None);
        assert_eq!(to_number("NaN"), None);
        assert_eq!(to_number("inf"), None);
    }

    #[test]
    fn parse_date_like_supports_recognised_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_date_like("2024-05-06"), Some(expected));
        assert_eq!(parse_date_like("2024/05/06"), Some(expected));
        assert_eq!(parse_date_like("2024.05.06"), Some(expected));
        let with_time = parse_date_like("2024-05-06 14:30:00").unwrap();
        assert_eq!(with_time.format("%H:%M").to_string(), "14:30");
    }

    #[test]
    fn parse_date_like_rejects_other_layouts() {
        assert!(!looks_like_date("06/05/2024"));
        assert!(!looks_like_date("2024-13-01"));
        assert!(!looks_like_date("yesterday"));
        assert!(!looks_like_date(""));
    }
}
