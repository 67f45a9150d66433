//! Timestamp parsing and formatting utilities.
//!
//! Subtitle and timeline arithmetic is done in integer milliseconds so that
//! segment sums are exact. Accepts `HH:MM:SS`, `HH:MM:SS.mmm`, `HH:MM:SS,mmm`
//! (SRT style), `MM:SS` and `SS`.

use thiserror::Error;

/// Maximum reasonable episode duration (24 hours in milliseconds).
pub const MAX_MEDIA_DURATION_MS: u64 = 86_400_000;

/// Timestamp parsing/validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("Timestamp cannot be empty")]
    Empty,

    #[error("Timestamp cannot be negative")]
    Negative,

    #[error("Invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid timestamp format '{0}'. Use HH:MM:SS, HH:MM:SS.mmm, HH:MM:SS,mmm, MM:SS or SS")]
    InvalidFormat(String),

    #[error("Start time must be before end time")]
    StartNotBeforeEnd,

    #[error("Timestamp exceeds maximum allowed duration ({0} ms)")]
    ExceedsMaxDuration(u64),
}

/// Parse a timestamp string to total milliseconds.
///
/// # Examples
/// ```
/// use lclip_models::timestamp::parse_timestamp_ms;
/// assert_eq!(parse_timestamp_ms("00:12:28,500").unwrap(), 748_500);
/// assert_eq!(parse_timestamp_ms("05:30").unwrap(), 330_000);
/// assert_eq!(parse_timestamp_ms("90").unwrap(), 90_000);
/// ```
pub fn parse_timestamp_ms(ts: &str) -> Result<u64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }
    if ts.starts_with('-') {
        return Err(TimestampError::Negative);
    }

    // SRT uses a comma as the decimal separator.
    let ts_norm = ts.replace(',', ".");
    let parts: Vec<&str> = ts_norm.split(':').collect();

    let (hours, minutes, seconds) = match parts.as_slice() {
        [s] => (0, 0, parse_seconds_ms(s)?),
        [m, s] => (0, parse_whole("minutes", m)?, parse_seconds_ms(s)?),
        [h, m, s] => (
            parse_whole("hours", h)?,
            parse_whole("minutes", m)?,
            parse_seconds_ms(s)?,
        ),
        _ => return Err(TimestampError::InvalidFormat(ts.to_string())),
    };

    let total = hours * 3_600_000 + minutes * 60_000 + seconds;
    if total > MAX_MEDIA_DURATION_MS {
        return Err(TimestampError::ExceedsMaxDuration(MAX_MEDIA_DURATION_MS));
    }
    Ok(total)
}

fn parse_whole(component: &'static str, value: &str) -> Result<u64, TimestampError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| TimestampError::InvalidValue(component, value.to_string()))
}

/// Parse `SS` or `SS.fff` into milliseconds without going through floats.
fn parse_seconds_ms(value: &str) -> Result<u64, TimestampError> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };

    let whole = parse_whole("seconds", whole)?;
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(TimestampError::InvalidValue("seconds", value.to_string()));
    }

    // Keep millisecond precision; extra digits are truncated.
    let mut millis = 0u64;
    for (i, digit) in frac.chars().take(3).enumerate() {
        let d = digit.to_digit(10).unwrap_or(0) as u64;
        millis += d * 10u64.pow(2 - i as u32);
    }

    Ok(whole * 1000 + millis)
}

/// Format milliseconds as `HH:MM:SS.mmm`.
pub fn format_ms(total_ms: u64) -> String {
    let hours = total_ms / 3_600_000;
    let mins = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
}

/// Format milliseconds as a seconds literal for the media engine (`12.345`).
pub fn ms_to_secs_arg(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Convert floating seconds reported by a probe into whole milliseconds.
pub fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

/// Parse a start/end hint pair into a millisecond range.
pub fn parse_range_ms(start: &str, end: &str) -> Result<(u64, u64), TimestampError> {
    let start_ms = parse_timestamp_ms(start)?;
    let end_ms = parse_timestamp_ms(end)?;
    if start_ms >= end_ms {
        return Err(TimestampError::StartNotBeforeEnd);
    }
    Ok((start_ms, end_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_hh_mm_ss() {
        assert_eq!(parse_timestamp_ms("00:00:00").unwrap(), 0);
        assert_eq!(parse_timestamp_ms("00:01:00").unwrap(), 60_000);
        assert_eq!(parse_timestamp_ms("01:30:45").unwrap(), 5_445_000);
    }

    #[test]
    fn test_parse_timestamp_srt_and_dot_fraction() {
        assert_eq!(parse_timestamp_ms("00:12:28,000").unwrap(), 748_000);
        assert_eq!(parse_timestamp_ms("00:12:36.250").unwrap(), 756_250);
        assert_eq!(parse_timestamp_ms("00:00:01.5").unwrap(), 1_500);
        assert_eq!(parse_timestamp_ms("00:00:01.23456").unwrap(), 1_234);
    }

    #[test]
    fn test_parse_timestamp_short_forms() {
        assert_eq!(parse_timestamp_ms("05:30").unwrap(), 330_000);
        assert_eq!(parse_timestamp_ms("90").unwrap(), 90_000);
    }

    #[test]
    fn test_parse_timestamp_errors() {
        assert!(matches!(parse_timestamp_ms(""), Err(TimestampError::Empty)));
        assert!(matches!(parse_timestamp_ms("-5"), Err(TimestampError::Negative)));
        assert!(matches!(
            parse_timestamp_ms("abc"),
            Err(TimestampError::InvalidValue(_, _))
        ));
        assert!(matches!(
            parse_timestamp_ms("1:2:3:4"),
            Err(TimestampError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_timestamp_ms("25:00:00:00"),
            Err(TimestampError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_format_roundtrip_shape() {
        assert_eq!(format_ms(0), "00:00:00.000");
        assert_eq!(format_ms(748_500), "00:12:28.500");
        assert_eq!(ms_to_secs_arg(1_500), "1.500");
        assert_eq!(ms_to_secs_arg(42), "0.042");
    }

    #[test]
    fn test_secs_to_ms_rounds() {
        assert_eq!(secs_to_ms(2.0004), 2_000);
        assert_eq!(secs_to_ms(2.0006), 2_001);
        assert_eq!(secs_to_ms(f64::NAN), 0);
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range_ms("00:00:01", "00:00:03").unwrap(), (1_000, 3_000));
        assert_eq!(
            parse_range_ms("00:00:03", "00:00:01"),
            Err(TimestampError::StartNotBeforeEnd)
        );
    }
}
