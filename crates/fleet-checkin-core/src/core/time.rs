// crates/fleet-checkin-core/src/core/time.rs
// ============================================================================
// Module: Fleet Check-in Time Model
// Description: Canonical instant representation and RFC3339 codec.
// Purpose: Give every layer one comparable, serializable notion of time.
// Dependencies: serde, thiserror, time
// ============================================================================

//! ## Overview
//! [`Timestamp`] is an instant stored as signed nanoseconds since the Unix
//! epoch (UTC). Its canonical text form is RFC3339; parsing is strict and any
//! offset is normalized to UTC. The nanosecond range covers roughly the years
//! 1677 through 2262; instants outside it are rejected at parse time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the timestamp codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    /// Input text is not a valid RFC3339 instant.
    #[error("invalid rfc3339 timestamp: {0}")]
    Parse(String),
    /// Input was absent.
    #[error("missing value")]
    Missing,
    /// Instant cannot be represented as nanoseconds in an `i64`.
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
}

/// A raw input field that failed to parse as a [`Timestamp`].
///
/// # Invariants
/// - `field` is the logical name of the input (e.g. `checked_in_before`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timestamp for {field}: {source}")]
pub struct InvalidTimestamp {
    /// Logical field name of the offending input.
    pub field: String,
    /// Underlying codec failure.
    #[source]
    pub source: TimestampError,
}

/// Parses a raw field value, tagging failures with the field name.
///
/// # Errors
///
/// Returns [`InvalidTimestamp`] carrying `field` when parsing fails.
pub fn parse_field(field: &str, raw: &str) -> Result<Timestamp, InvalidTimestamp> {
    Timestamp::parse_rfc3339(raw).map_err(|source| InvalidTimestamp {
        field: field.to_string(),
        source,
    })
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// An instant in time with nanosecond precision.
///
/// # Invariants
/// - Ordering is total and matches chronological order.
/// - The textual wire form is always RFC3339 in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    /// Nanoseconds since the Unix epoch.
    unix_nanos: i64,
}

impl Timestamp {
    /// The Unix epoch.
    pub const UNIX_EPOCH: Self = Self::from_unix_nanos(0);

    /// Creates a timestamp from nanoseconds since the Unix epoch.
    #[must_use]
    pub const fn from_unix_nanos(unix_nanos: i64) -> Self {
        Self {
            unix_nanos,
        }
    }

    /// Returns nanoseconds since the Unix epoch.
    #[must_use]
    pub const fn unix_nanos(self) -> i64 {
        self.unix_nanos
    }

    /// Returns milliseconds since the Unix epoch (floored).
    #[must_use]
    pub const fn unix_millis(self) -> i64 {
        self.unix_nanos.div_euclid(1_000_000)
    }

    /// Converts an [`OffsetDateTime`] into a timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError::OutOfRange`] when the instant does not fit.
    pub fn from_offset_datetime(value: OffsetDateTime) -> Result<Self, TimestampError> {
        let nanos = value.unix_timestamp_nanos();
        i64::try_from(nanos)
            .map(Self::from_unix_nanos)
            .map_err(|_| TimestampError::OutOfRange(format!("{nanos} nanoseconds")))
    }

    /// Converts the timestamp into a UTC [`OffsetDateTime`].
    #[must_use]
    pub fn to_offset_datetime(self) -> OffsetDateTime {
        // Every i64 nanosecond value lies inside the range `time` supports.
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.unix_nanos))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Returns the current wall-clock instant.
    #[must_use]
    pub fn now_utc() -> Self {
        Self::from_offset_datetime(OffsetDateTime::now_utc()).unwrap_or(Self::UNIX_EPOCH)
    }

    /// Parses a strict RFC3339 string.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError`] when parsing fails or the value is out of range.
    pub fn parse_rfc3339(value: &str) -> Result<Self, TimestampError> {
        let parsed = OffsetDateTime::parse(value, &Rfc3339)
            .map_err(|err| TimestampError::Parse(format!("{value:?}: {err}")))?;
        Self::from_offset_datetime(parsed)
    }

    /// Formats the timestamp as RFC3339 in UTC.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        self.to_offset_datetime()
            .format(&Rfc3339)
            .unwrap_or_else(|_| format!("{}ns", self.unix_nanos))
    }

    /// Adds a duration, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let delta = i64::try_from(duration.whole_nanoseconds()).ok()?;
        self.unix_nanos.checked_add(delta).map(Self::from_unix_nanos)
    }

    /// Subtracts a duration, returning `None` on overflow.
    #[must_use]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        let delta = i64::try_from(duration.whole_nanoseconds()).ok()?;
        self.unix_nanos.checked_sub(delta).map(Self::from_unix_nanos)
    }

    /// Returns true when both instants fall on the same UTC calendar day.
    #[must_use]
    pub fn same_utc_day(self, other: Self) -> bool {
        self.to_offset_datetime().date() == other.to_offset_datetime().date()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse_rfc3339(value)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse_rfc3339(&text).map_err(serde::de::Error::custom)
    }
}
