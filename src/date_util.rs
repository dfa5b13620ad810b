use chrono::{DateTime, NaiveDate, Utc};

/// Parse a stored date value. Accepts `YYYY-MM-DD` and RFC 3339 timestamps.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// Render a stored date as `DD.MM.YYYY`, or return the input unchanged if it
/// does not parse.
pub fn display_date(s: &str) -> String {
    match parse_date(s) {
        Some(d) => d.format("%d.%m.%Y").to_string(),
        None => s.to_string(),
    }
}

/// Render a timestamp as `DD.MM.YYYY HH:MM` (UTC).
pub fn display_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%d.%m.%Y %H:%M").to_string()
}

/// Parse a timestamp written by this crate. Rows written by hand with
/// SQLite's `datetime('now')` format are accepted too.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Cut `s` to at most `max_chars` characters, ending with an ellipsis when
/// anything was removed.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(
            parse_date("2025-03-07"),
            NaiveDate::from_ymd_opt(2025, 3, 7)
        );
        assert_eq!(
            parse_date("2025-03-07T10:00:00+03:00"),
            NaiveDate::from_ymd_opt(2025, 3, 7)
        );
        assert_eq!(parse_date("next tuesday"), None);
    }

    #[test]
    fn test_display_date_falls_back_to_raw() {
        assert_eq!(display_date("2025-12-31"), "31.12.2025");
        assert_eq!(display_date("31/12/2025"), "31/12/2025");
    }

    #[test]
    fn test_parse_timestamp_sqlite_format() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2025-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("garbage"), None);
    }

    #[test]
    fn test_display_timestamp() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 9, 5, 0).unwrap();
        assert_eq!(display_timestamp(&ts), "01.06.2025 09:05");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exactly", 7), "exactly");
        assert_eq!(truncate_chars("abcdefgh", 5), "abcd…");
        // Multi-byte characters count once.
        assert_eq!(truncate_chars("привет мир", 4), "при…");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
