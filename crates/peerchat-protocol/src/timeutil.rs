//! Tolerant wire-timestamp parsing.
//!
//! New peers serialize timestamps as RFC 3339. Rows and requests
//! produced by the original daemon used Go's `time.Time` text form,
//! e.g. `2024-05-01 12:00:00.123456 +0200 CEST m=+46.107792917`, so
//! reads accept both.

use chrono::{DateTime, Utc};
use peerchat_types::{PeerchatError, Result};

/// Formats a timestamp for the wire (RFC 3339, UTC).
pub fn format_wire_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// Parses a wire timestamp, accepting RFC 3339 and the legacy Go
/// `time.Time` textual representation.
///
/// # Errors
///
/// Returns [`PeerchatError::InvalidInput`] if neither format matches.
pub fn parse_wire_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }

    // Legacy Go form. Strip the monotonic clock suffix first.
    let cleaned = match raw.find(" m=") {
        Some(idx) => &raw[..idx],
        None => raw,
    };

    // Drop the trailing zone abbreviation ("MST", "CEST", ...) — the
    // numeric offset before it is authoritative and chrono cannot
    // parse zone names.
    let trimmed = match cleaned.rfind(' ') {
        Some(idx)
            if cleaned[idx + 1..]
                .chars()
                .all(|c| c.is_ascii_alphabetic()) =>
        {
            &cleaned[..idx]
        }
        _ => cleaned,
    };

    DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f %z")
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PeerchatError::InvalidInput {
            reason: format!("unparseable timestamp '{raw}': {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rfc3339_round_trip() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let parsed = parse_wire_timestamp(&format_wire_timestamp(t)).unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn legacy_go_format_with_monotonic_suffix() {
        let parsed =
            parse_wire_timestamp("2024-05-01 12:00:00.123456 +0000 UTC m=+46.107792917").unwrap();
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
    }

    #[test]
    fn legacy_go_format_with_offset_zone() {
        let parsed = parse_wire_timestamp("2024-05-01 14:00:00 +0200 CEST").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_wire_timestamp("yesterday-ish").is_err());
    }
}
