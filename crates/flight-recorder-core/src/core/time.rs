// crates/flight-recorder-core/src/core/time.rs
// ============================================================================
// Module: Flight Recorder Time Model
// Description: Canonical UTC timestamp representation for records and cursors.
// Purpose: Provide one timestamp type with stable RFC 3339 wire form and a
//          unix-millisecond persistence form.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! All recorder timestamps are UTC. On the wire they serialize as RFC 3339
//! strings; in storage they persist as unix epoch milliseconds. Pagination
//! cursors over `started_at` reuse the RFC 3339 form.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Timestamp conversion errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum TimestampError {
    /// RFC 3339 parse failure.
    #[error("invalid rfc3339 timestamp: {0}")]
    Parse(String),
    /// RFC 3339 format failure.
    #[error("timestamp format failure: {0}")]
    Format(String),
    /// Millisecond value outside the representable range.
    #[error("timestamp out of range: {0}")]
    Range(i64),
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical UTC timestamp.
///
/// # Invariants
/// - Always UTC; offsets parsed from the wire are normalized to UTC.
/// - Persistence round-trips through unix milliseconds, so sub-millisecond
///   precision is not preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcTimestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl UtcTimestamp {
    /// Captures the current wall-clock time in UTC.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc().to_offset(time::UtcOffset::UTC))
    }

    /// Builds a timestamp from unix epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError::Range`] when the value is outside the
    /// representable range.
    pub fn from_unix_millis(millis: i64) -> Result<Self, TimestampError> {
        let nanos = i128::from(millis) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map(Self)
            .map_err(|_| TimestampError::Range(millis))
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub fn unix_millis(&self) -> i64 {
        let millis = self.0.unix_timestamp_nanos() / 1_000_000;
        i64::try_from(millis).unwrap_or(i64::MAX)
    }

    /// Parses an RFC 3339 timestamp string.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError::Parse`] when the input is not valid RFC 3339.
    pub fn parse_rfc3339(value: &str) -> Result<Self, TimestampError> {
        OffsetDateTime::parse(value, &Rfc3339)
            .map(|parsed| Self(parsed.to_offset(time::UtcOffset::UTC)))
            .map_err(|err| TimestampError::Parse(err.to_string()))
    }

    /// Formats the timestamp as an RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError::Format`] when formatting fails.
    pub fn rfc3339(&self) -> Result<String, TimestampError> {
        self.0.format(&Rfc3339).map_err(|err| TimestampError::Format(err.to_string()))
    }
}

impl fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rfc3339() {
            Ok(formatted) => formatted.fmt(f),
            Err(_) => self.unix_millis().fmt(f),
        }
    }
}
