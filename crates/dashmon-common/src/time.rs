//! Relative time expressions (`now`, `now-15m`, ...) used by query requests
//! and rule frequencies.

use chrono::{DateTime, TimeDelta, Utc};

/// Range assumed when a `from` expression cannot be parsed.
pub const DEFAULT_RANGE_SECS: i64 = 3600;

/// Rule evaluation frequency assumed when the stored value is malformed.
pub const DEFAULT_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeExprError {
    #[error("unrecognized time expression: {0}")]
    Unrecognized(String),

    #[error("time expression out of range: {0}")]
    OutOfRange(String),
}

fn unit_secs(unit: char) -> Option<i64> {
    match unit {
        's' => Some(1),
        'm' => Some(60),
        'h' => Some(3600),
        'd' => Some(86_400),
        'w' => Some(604_800),
        _ => None,
    }
}

/// Parses `<N><unit>` into seconds.
fn amount_with_unit(s: &str) -> Option<i64> {
    let unit = s.chars().last()?;
    let multiplier = unit_secs(unit)?;
    let digits = &s[..s.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()?.checked_mul(multiplier)
}

/// Seconds encoded by a `now-<N><unit>` expression, if it has that form.
pub fn relative_offset_secs(expr: &str) -> Option<i64> {
    expr.trim().strip_prefix("now-").and_then(amount_with_unit)
}

/// Length in seconds of the range that starts at `expr` and ends now.
///
/// Anything that is not `now-<N><unit>` (unit one of `s m h d w`) yields one
/// hour.
///
/// # Examples
///
/// ```
/// use dashmon_common::time::parse_duration;
///
/// assert_eq!(parse_duration("now-15m"), 900);
/// assert_eq!(parse_duration("now-2d"), 172_800);
/// assert_eq!(parse_duration("yesterday"), 3600);
/// ```
pub fn parse_duration(expr: &str) -> i64 {
    relative_offset_secs(expr).unwrap_or(DEFAULT_RANGE_SECS)
}

/// Resolves a time expression to an absolute instant relative to `now`.
///
/// Accepts `now`, `now-<N><unit>`, RFC 3339 timestamps and integer unix
/// seconds.
pub fn resolve_instant(expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, TimeExprError> {
    let trimmed = expr.trim();
    if trimmed == "now" {
        return Ok(now);
    }
    if let Some(secs) = relative_offset_secs(trimmed) {
        return TimeDelta::try_seconds(secs)
            .and_then(|delta| now.checked_sub_signed(delta))
            .ok_or_else(|| TimeExprError::OutOfRange(trimmed.to_string()));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(secs) = trimmed.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| TimeExprError::OutOfRange(trimmed.to_string()));
    }
    Err(TimeExprError::Unrecognized(trimmed.to_string()))
}

/// Parses a rule frequency such as `30s` or `1m` into seconds.
///
/// Returns `None` for malformed or zero-length intervals.
pub fn parse_interval(expr: &str) -> Option<i64> {
    amount_with_unit(expr.trim()).filter(|secs| *secs > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_duration_handles_every_unit() {
        assert_eq!(parse_duration("now-30s"), 30);
        assert_eq!(parse_duration("now-5m"), 300);
        assert_eq!(parse_duration("now-1h"), 3600);
        assert_eq!(parse_duration("now-6h"), 21_600);
        assert_eq!(parse_duration("now-7d"), 604_800);
        assert_eq!(parse_duration("now-2w"), 1_209_600);
    }

    #[test]
    fn parse_duration_defaults_to_one_hour() {
        for expr in ["", "now", "now-", "now-5", "now-5y", "now-m", "5m", "now-1.5h", "now--5m"] {
            assert_eq!(parse_duration(expr), DEFAULT_RANGE_SECS, "expr: {expr:?}");
        }
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        assert_eq!(parse_duration("now-99999999999999999999w"), DEFAULT_RANGE_SECS);
    }

    #[test]
    fn resolve_instant_relative_and_absolute() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(resolve_instant("now", now).unwrap(), now);
        assert_eq!(
            resolve_instant("now-15m", now).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 11, 45, 0).unwrap()
        );
        assert_eq!(
            resolve_instant("2024-02-29T23:00:00Z", now).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 23, 0, 0).unwrap()
        );
        assert_eq!(
            resolve_instant("1709294400", now).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn resolve_instant_rejects_garbage() {
        let now = Utc::now();
        assert!(matches!(
            resolve_instant("now() - interval '1 hour'", now),
            Err(TimeExprError::Unrecognized(_))
        ));
    }

    #[test]
    fn parse_interval_accepts_rule_frequencies() {
        assert_eq!(parse_interval("1m"), Some(60));
        assert_eq!(parse_interval(" 30s "), Some(30));
        assert_eq!(parse_interval("0m"), None);
        assert_eq!(parse_interval("often"), None);
    }
}
