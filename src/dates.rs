//! Shared timestamp normalization
//!
//! The supported missions encode acquisition times in at least five distinct
//! notations. This module is the single source of truth for what counts as a
//! valid timestamp: every handler routes its raw time strings through
//! [`parse_date`], which emits the canonical `YYYYMMDDTHHMMSS` form used in
//! output base names and catalog columns.

use crate::types::{SarError, SarResult};
use chrono::NaiveDateTime;

/// Source formats, tried in order. Covers ESA headers (03-JAN-2020 ...),
/// compact digit strings, ISO with and without a trailing Z, and the
/// PALSAR workreport notation (YYYYMMDD HH:MM:SS.f).
const TIME_FORMATS: [&str; 5] = [
    "%d-%b-%Y %H:%M:%S%.f",
    "%Y%m%d%H%M%S%f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y%m%d %H:%M:%S%.f",
];

/// Output format; always 15 characters.
const CANONICAL_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Normalize a vendor timestamp to `YYYYMMDDTHHMMSS`.
pub fn parse_date(text: &str) -> SarResult<String> {
    let trimmed = text.trim();
    for fmt in TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.format(CANONICAL_FORMAT).to_string());
        }
    }
    Err(SarError::TimeFormat(trimmed.to_string()))
}

/// Check whether a string already is a canonical timestamp, as required by
/// catalog query bounds.
pub fn is_canonical(text: &str) -> bool {
    NaiveDateTime::parse_from_str(text, CANONICAL_FORMAT).is_ok() && text.len() == 15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_all_known_source_formats() {
        let inputs = [
            "03-JAN-2020 17:08:15.123456",
            "20200103170815123456",
            "2020-01-03T17:08:15.123456",
            "2020-01-03T17:08:15.123456Z",
            "20200103 17:08:15.123",
        ];
        for input in inputs {
            let out = parse_date(input).unwrap();
            assert_eq!(out, "20200103T170815", "input: {input}");
            assert_eq!(out.len(), 15);
        }
    }

    #[test]
    fn accepts_times_without_fraction() {
        assert_eq!(
            parse_date("2020-01-01T00:00:00").unwrap(),
            "20200101T000000"
        );
    }

    #[test]
    fn rejects_unknown_notation() {
        assert!(matches!(
            parse_date("January 3rd 2020"),
            Err(SarError::TimeFormat(_))
        ));
        assert!(parse_date("").is_err());
    }

    #[test]
    fn canonical_check() {
        assert!(is_canonical("20200101T000000"));
        assert!(!is_canonical("2020-01-01"));
        assert!(!is_canonical("20200101T0000000"));
    }
}
