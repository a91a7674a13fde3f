//! Duration and memory-size parsing
//!
//! Timeouts in config accept either a bare number (milliseconds) or a
//! suffixed string such as `"10s"`, `"5m"` or `"1h"`. Memory limits use
//! binary suffixes (`512kb`, `1gb`).

use std::time::Duration;

use serde_yaml::Value;

/// Parse a duration from a loose config value.
///
/// Accepts a bare number (milliseconds) or a string with an `ms`, `s`,
/// `m` or `h` suffix. Returns `None` for anything unparseable or
/// non-positive.
pub fn parse_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => {
            let ms = n.as_f64()?;
            if ms > 0.0 {
                Some(Duration::from_millis(ms as u64))
            } else {
                None
            }
        }
        Value::String(s) => parse_duration_str(s),
        _ => None,
    }
}

/// Parse a duration string such as `"100ms"`, `"10s"`, `"5m"` or `"1.5h"`
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (number, multiplier_ms) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1.0)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1_000.0)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000.0)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000.0)
    } else {
        (s, 1.0)
    };

    let number: f64 = number.trim().parse().ok()?;
    let ms = number * multiplier_ms;
    if ms > 0.0 {
        Some(Duration::from_millis(ms as u64))
    } else {
        None
    }
}

/// Parse a memory size such as `"512kb"` or `"1gb"` into bytes
pub fn parse_memory_size(s: &str) -> Option<u64> {
    let s = s.trim().to_ascii_lowercase();
    let (number, multiplier) = if let Some(rest) = s.strip_suffix("gb") {
        (rest.to_string(), 1024u64 * 1024 * 1024)
    } else if let Some(rest) = s.strip_suffix("mb") {
        (rest.to_string(), 1024 * 1024)
    } else if let Some(rest) = s.strip_suffix("kb") {
        (rest.to_string(), 1024)
    } else if let Some(rest) = s.strip_suffix('b') {
        (rest.to_string(), 1)
    } else {
        (s, 1)
    };

    let number: f64 = number.trim().parse().ok()?;
    if number < 0.0 {
        return None;
    }
    Some((number * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_number_is_milliseconds() {
        let value: Value = serde_yaml::from_str("1500").unwrap();
        assert_eq!(parse_duration(&value), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_suffixed_strings() {
        assert_eq!(parse_duration_str("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration_str("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration_str("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_str("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_fractional_duration() {
        assert_eq!(parse_duration_str("1.5s"), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_bare_string_number() {
        assert_eq!(parse_duration_str("250"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_durations() {
        assert_eq!(parse_duration_str("abc"), None);
        assert_eq!(parse_duration_str("0"), None);
        assert_eq!(parse_duration_str("-5s"), None);
    }

    #[test]
    fn test_memory_sizes() {
        assert_eq!(parse_memory_size("512kb"), Some(512 * 1024));
        assert_eq!(parse_memory_size("1gb"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_size("10MB"), Some(10 * 1024 * 1024));
        assert_eq!(parse_memory_size("64"), Some(64));
        assert_eq!(parse_memory_size("64b"), Some(64));
    }

    #[test]
    fn test_invalid_memory_size() {
        assert_eq!(parse_memory_size("lots"), None);
        assert_eq!(parse_memory_size("-1kb"), None);
    }
}
