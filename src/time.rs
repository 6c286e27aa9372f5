//! Start-time parsing for telemetry streams.
//!
//! Callers often pass a calendar date where a full timestamp is expected.
//! A value that fails to parse as RFC 3339 is padded towards midnight UTC
//! and parsed again; if that fails too the stream starts from "now".

use chrono::{DateTime, Utc};
use tracing::debug;

/// Padding appended to a truncated timestamp, indexed from the end of the date part.
const MIDNIGHT_SUFFIX: &str = "T00:00:00.00Z";

/// Shortest input that can be padded: a bare `YYYY-MM-DD`.
const DATE_LEN: usize = 10;

/// Longest input that still needs padding.
const PADDABLE_MAX: usize = DATE_LEN + MIDNIGHT_SUFFIX.len();

/// Where a telemetry stream begins reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Events enqueued at or after this instant.
    At(DateTime<Utc>),
    /// Only events enqueued from the moment the receiver opens.
    Now,
}

impl StartPosition {
    /// Parses an optional caller-supplied start time.
    ///
    /// Absent, blank, or unparseable input all yield `Now`.
    ///
    /// # Examples
    ///
    /// ```
    /// use iothub_link::time::StartPosition;
    ///
    /// let p = StartPosition::parse(Some("2023-05-01"));
    /// assert_eq!(p.instant().unwrap().to_rfc3339(), "2023-05-01T00:00:00+00:00");
    /// assert_eq!(StartPosition::parse(Some("not-a-date")), StartPosition::Now);
    /// assert_eq!(StartPosition::parse(None), StartPosition::Now);
    /// ```
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if !s.trim().is_empty() => parse_start_time(s).map_or(Self::Now, Self::At),
            _ => Self::Now,
        }
    }

    #[must_use]
    pub const fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(t) => Some(*t),
            Self::Now => None,
        }
    }

    /// Resolves to a concrete instant, reading the clock for `Now`.
    #[must_use]
    pub fn resolve(&self) -> DateTime<Utc> {
        self.instant().unwrap_or_else(Utc::now)
    }
}

/// Parses a full timestamp, falling back to a padded date-only form.
///
/// Returns `None` if both attempts fail.
#[must_use]
pub fn parse_start_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }

    let trimmed = raw.trim();
    let len = trimmed.len();
    if !(DATE_LEN..PADDABLE_MAX).contains(&len) {
        debug!(input = raw, "start time is not a timestamp or date; starting from now");
        return None;
    }

    let padded = format!("{trimmed}{}", &MIDNIGHT_SUFFIX[len - DATE_LEN..]);
    match DateTime::parse_from_rfc3339(&padded) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            debug!(input = raw, error = %e, "start time fallback parse failed; starting from now");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_full_timestamp() {
        let t = parse_start_time("2023-05-01T08:30:00Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 5, 1, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_offset_timestamp_normalised_to_utc() {
        let t = parse_start_time("2023-05-01T10:00:00+02:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 5, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_date_only_pads_to_midnight() {
        let t = parse_start_time("2023-05-01").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_date_with_whitespace() {
        let t = parse_start_time("  2023-05-01 ").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_partial_time_is_completed() {
        let t = parse_start_time("2023-05-01T12").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap());

        let t = parse_start_time("2023-05-01T12:45").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 5, 1, 12, 45, 0).unwrap());
    }

    #[test]
    fn test_garbage_fails_both_attempts() {
        assert!(parse_start_time("not-a-date").is_none());
        assert!(parse_start_time("yesterday").is_none());
        assert!(parse_start_time("2023-13-45").is_none());
    }

    #[test]
    fn test_start_position_falls_back_to_now() {
        assert_eq!(StartPosition::parse(Some("not-a-date")), StartPosition::Now);
        assert_eq!(StartPosition::parse(Some("   ")), StartPosition::Now);

        let before = Utc::now();
        let resolved = StartPosition::Now.resolve();
        assert!(resolved >= before);
    }
}
