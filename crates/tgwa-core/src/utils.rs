use chrono::{SecondsFormat, Utc};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (health endpoint, operator replies).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============== Text Helpers ==============

/// Cap `s` at `max_len` characters, marking the cut with `...`.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

/// Parse a positive day count from an optional command argument.
pub fn parse_days(arg: Option<&str>, default: u32) -> u32 {
    arg.and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|d| *d > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(30);
        let t = truncate_text(&s, 10);
        assert_eq!(t, format!("{}...", "a".repeat(10)));
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn truncate_text_counts_chars_not_bytes() {
        assert_eq!(truncate_text("📢📢📢", 2), "📢📢...");
    }

    #[test]
    fn parse_days_falls_back_on_garbage() {
        assert_eq!(parse_days(Some("7"), 30), 7);
        assert_eq!(parse_days(Some("0"), 30), 30);
        assert_eq!(parse_days(Some("week"), 30), 30);
        assert_eq!(parse_days(None, 1), 1);
    }
}
