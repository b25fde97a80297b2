#![forbid(unsafe_code)]

//! Timestamp conventions: assistant logs use epoch milliseconds, git rows use RFC 3339 UTC text.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Values above this are taken to be milliseconds rather than seconds.
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

pub fn normalize_seconds(value: i64) -> i64 {
    if value > MILLIS_THRESHOLD {
        value / 1000
    } else {
        value
    }
}

pub fn normalize_millis(value: i64) -> i64 {
    if value > MILLIS_THRESHOLD {
        value
    } else {
        value.saturating_mul(1000)
    }
}

pub fn millis_from_rfc3339(text: &str) -> Option<i64> {
    let parsed = OffsetDateTime::parse(text.trim(), &Rfc3339).ok()?;
    i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).ok()
}

/// `2024-01-02T03:04:05Z` for a unix timestamp in seconds.
pub fn rfc3339_from_unix(seconds: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(seconds)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_values_are_detected() {
        assert_eq!(normalize_seconds(1_700_000_000_123), 1_700_000_000);
        assert_eq!(normalize_seconds(1_700_000_000), 1_700_000_000);
        assert_eq!(normalize_millis(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_millis(1_700_000_000_123), 1_700_000_000_123);
    }

    #[test]
    fn rfc3339_round_trips_through_epoch() {
        assert_eq!(
            millis_from_rfc3339("2024-01-02T03:04:05.678Z"),
            Some(1_704_164_645_678)
        );
        assert_eq!(
            rfc3339_from_unix(1_704_164_645).as_deref(),
            Some("2024-01-02T03:04:05Z")
        );
        assert_eq!(millis_from_rfc3339("yesterday"), None);
    }
}
