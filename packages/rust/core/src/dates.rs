//! Source date normalization and the collection window.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static HANGUL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{AC00}-\u{D7A3}\u{3131}-\u{318E}]").expect("valid regex"));

/// Output format of every normalized date.
pub const DATE_FORMAT: &str = "%Y.%m.%d";

/// Render a source date as `YYYY.MM.DD`.
///
/// With `format`, the text is parsed with that chrono format (Hangul removed
/// first). Without one, the first eight digits are read as `YYYYMMDD`.
/// Returns `""` when nothing usable is found.
pub fn normalize_date(text: &str, format: Option<&str>) -> String {
    let stripped = HANGUL_RE.replace_all(text, "");
    let stripped = stripped.trim();

    let parsed = match format {
        Some(format) => NaiveDate::parse_from_str(stripped, format)
            .ok()
            .or_else(|| parse_leading_datetime(stripped, format)),
        None => {
            let digits: String = stripped.chars().filter(char::is_ascii_digit).take(8).collect();
            if digits.len() == 8 {
                NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
            } else {
                None
            }
        }
    };

    parsed
        .map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Formats carrying a time component still yield their date.
fn parse_leading_datetime(text: &str, format: &str) -> Option<NaiveDate> {
    chrono::NaiveDateTime::parse_from_str(text, format)
        .ok()
        .map(|dt| dt.date())
}

/// Whether a normalized date lies between `today - days` and `today`, inclusive.
///
/// Empty or unparseable dates are outside every window.
pub fn is_within_days(date: &str, days: i64, today: NaiveDate) -> bool {
    let Ok(date) = NaiveDate::parse_from_str(date, DATE_FORMAT) else {
        return false;
    };
    let age = (today - date).num_days();
    (0..=days).contains(&age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_are_read_as_ymd() {
        assert_eq!(normalize_date("2025.05.28", None), "2025.05.28");
        assert_eq!(normalize_date("2025-05-28 14:03", None), "2025.05.28");
        assert_eq!(normalize_date("2025년 05월 28일", None), "2025.05.28");
        assert_eq!(normalize_date("입력 2025/05/28", None), "2025.05.28");
    }

    #[test]
    fn explicit_format() {
        assert_eq!(normalize_date("May 28, 2025", Some("%B %d, %Y")), "2025.05.28");
        assert_eq!(
            normalize_date("2025-05-28 09:10", Some("%Y-%m-%d %H:%M")),
            "2025.05.28"
        );
        assert_eq!(normalize_date("28.05.2025", Some("%d.%m.%Y")), "2025.05.28");
    }

    #[test]
    fn garbage_is_empty() {
        assert_eq!(normalize_date("", None), "");
        assert_eq!(normalize_date("어제", None), "");
        assert_eq!(normalize_date("2025.13.40", None), "");
        assert_eq!(normalize_date("nope", Some("%Y-%m-%d")), "");
    }

    #[test]
    fn window_is_inclusive() {
        let today = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        assert!(is_within_days("2025.05.28", 30, today));
        assert!(is_within_days("2025.04.28", 30, today));
        assert!(!is_within_days("2025.04.27", 30, today));
        assert!(!is_within_days("2025.05.29", 30, today));
        assert!(!is_within_days("", 30, today));
    }
}
