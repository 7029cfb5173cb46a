// crates/fleet-checkin-core/src/core/filter.rs
// ============================================================================
// Module: Fleet Check-in Time-Window Filters
// Description: Validated-by-construction filters over cluster check-in history.
// Purpose: Reject bound combinations that can never match a cluster.
// Dependencies: serde, thiserror, time
// ============================================================================

//! ## Overview
//! Three filter kinds select clusters by the aggregate instants of their
//! check-ins:
//! - [`ClusterAgeFilter`]: four bounds over the first and last check-in.
//! - [`ClusterCheckinsFilter`]: two bounds over the first check-in.
//! - [`PersistentClustersFilter`]: epoch and timestamp, plus a derived
//!   `relative_yesterday` bound (`timestamp - 24h`) over the last check-in.
//!
//! Fields are private and the only way to obtain a filter is a constructor
//! that validates every invariant first. Invariants are checked in a fixed
//! order, so an input that violates several of them always reports the same
//! one. [`TimeFilter`] closes the set of variants for the query translator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::Duration;

use crate::core::time::InvalidTimestamp;
use crate::core::time::Timestamp;
use crate::core::time::TimestampError;
use crate::core::time::parse_field;

// ============================================================================
// SECTION: Keys and Invariants
// ============================================================================

/// Logical name of a filter bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    /// Latest check-in must be strictly before this instant.
    CheckedInBefore,
    /// First check-in must be strictly after this instant.
    CheckedInAfter,
    /// First check-in must be strictly before this instant.
    CreatedBefore,
    /// First check-in must be strictly after this instant.
    CreatedAfter,
    /// Persistent filter lower bound on the first check-in.
    Epoch,
    /// Persistent filter upper bound on the first check-in.
    Timestamp,
}

impl FilterKey {
    /// Returns the stable parameter name of the key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CheckedInBefore => "checked_in_before",
            Self::CheckedInAfter => "checked_in_after",
            Self::CreatedBefore => "created_before",
            Self::CreatedAfter => "created_after",
            Self::Epoch => "epoch",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction invariant of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterInvariant {
    /// `created_before <= checked_in_before`.
    CreatedBeforeWithinCheckedInBefore,
    /// `checked_in_after < checked_in_before`.
    CheckedInWindowOrdered,
    /// `created_after < created_before`.
    CreatedWindowOrdered,
    /// `checked_in_before > created_after`.
    CheckedInBeforeAfterCreatedAfter,
    /// `epoch < timestamp`.
    PersistentWindowOrdered,
}

/// A named bound value participating in a violated invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterBound {
    /// Logical bound name.
    pub key: FilterKey,
    /// Bound instant.
    pub at: Timestamp,
}

impl FilterBound {
    /// Creates a bound.
    #[must_use]
    pub const fn new(key: FilterKey, at: Timestamp) -> Self {
        Self {
            key,
            at,
        }
    }
}

impl fmt::Display for FilterBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.at)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// A filter whose bounds can never match any cluster.
///
/// # Invariants
/// - `left` and `right` are the two bounds named by `invariant`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("impossible filter: {reason} ({left}, {right})")]
pub struct ImpossibleFilter {
    /// Violated invariant.
    pub invariant: FilterInvariant,
    /// Bound that must be the larger one.
    pub left: FilterBound,
    /// Bound that must be the smaller one.
    pub right: FilterBound,
    /// Human-readable reason.
    pub reason: String,
}

/// Filter construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// Bounds conflict.
    #[error(transparent)]
    Impossible(ImpossibleFilter),
    /// A raw bound failed to parse.
    #[error(transparent)]
    InvalidTimestamp(InvalidTimestamp),
    /// A derived bound fell outside the representable range.
    #[error("filter bound out of range: {0}")]
    OutOfRange(String),
}

impl From<ImpossibleFilter> for FilterError {
    fn from(error: ImpossibleFilter) -> Self {
        Self::Impossible(error)
    }
}

impl From<InvalidTimestamp> for FilterError {
    fn from(error: InvalidTimestamp) -> Self {
        Self::InvalidTimestamp(error)
    }
}

/// Fails with [`ImpossibleFilter`] unless `left` is greater than `right`
/// (or equal, when `allow_equal` is set).
fn require_greater(
    invariant: FilterInvariant,
    left: FilterBound,
    right: FilterBound,
    allow_equal: bool,
) -> Result<(), ImpossibleFilter> {
    let holds = if allow_equal { left.at >= right.at } else { left.at > right.at };
    if holds {
        return Ok(());
    }
    let relation = if allow_equal { "greater than or equal to" } else { "greater than" };
    Err(ImpossibleFilter {
        invariant,
        left,
        right,
        reason: format!("{} needs to be {relation} {}", left.key, right.key),
    })
}

// ============================================================================
// SECTION: Parameter Source
// ============================================================================

/// Source of raw request parameters (e.g. a decoded query string).
pub trait ParamSource {
    /// Returns the raw value for `name`, if present.
    fn param(&self, name: &str) -> Option<&str>;
}

impl<S: BuildHasher> ParamSource for HashMap<String, String, S> {
    fn param(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl ParamSource for BTreeMap<String, String> {
    fn param(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

/// Reads and parses a required bound from a parameter source.
fn required_bound<P: ParamSource + ?Sized>(
    source: &P,
    key: FilterKey,
) -> Result<Timestamp, InvalidTimestamp> {
    match source.param(key.as_str()) {
        Some(raw) => parse_field(key.as_str(), raw),
        None => Err(InvalidTimestamp {
            field: key.as_str().to_string(),
            source: TimestampError::Missing,
        }),
    }
}

// ============================================================================
// SECTION: Cluster Age Filter
// ============================================================================

/// Unvalidated bounds of a [`ClusterAgeFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAgeBounds {
    /// Latest check-in must be strictly before this instant.
    pub checked_in_before: Timestamp,
    /// First check-in must be strictly after this instant.
    pub checked_in_after: Timestamp,
    /// First check-in must be strictly before this instant.
    pub created_before: Timestamp,
    /// First check-in must be strictly after this instant.
    pub created_after: Timestamp,
}

/// Selects clusters by first and last check-in.
///
/// The first check-in stands in for creation time since clusters carry no
/// explicit creation timestamp.
///
/// # Invariants
/// Checked in this order on construction:
/// 1. `checked_in_before > created_after`
/// 2. `created_before <= checked_in_before`
/// 3. `checked_in_after < checked_in_before`
/// 4. `created_after < created_before`
///
/// The first relation is implied by the last two, so it is never violated
/// alone; checking it first keeps it reportable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClusterAgeBounds")]
pub struct ClusterAgeFilter {
    /// Latest check-in upper bound.
    checked_in_before: Timestamp,
    /// First check-in lower bound.
    checked_in_after: Timestamp,
    /// First check-in upper bound.
    created_before: Timestamp,
    /// First check-in lower bound.
    created_after: Timestamp,
}

impl ClusterAgeFilter {
    /// Validates bounds and builds the filter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Impossible`] for the first violated invariant.
    pub fn new(bounds: ClusterAgeBounds) -> Result<Self, FilterError> {
        let checked_in_before = FilterBound::new(FilterKey::CheckedInBefore, bounds.checked_in_before);
        let checked_in_after = FilterBound::new(FilterKey::CheckedInAfter, bounds.checked_in_after);
        let created_before = FilterBound::new(FilterKey::CreatedBefore, bounds.created_before);
        let created_after = FilterBound::new(FilterKey::CreatedAfter, bounds.created_after);
        require_greater(
            FilterInvariant::CheckedInBeforeAfterCreatedAfter,
            checked_in_before,
            created_after,
            false,
        )?;
        require_greater(
            FilterInvariant::CreatedBeforeWithinCheckedInBefore,
            checked_in_before,
            created_before,
            true,
        )?;
        require_greater(
            FilterInvariant::CheckedInWindowOrdered,
            checked_in_before,
            checked_in_after,
            false,
        )?;
        require_greater(FilterInvariant::CreatedWindowOrdered, created_before, created_after, false)?;
        Ok(Self {
            checked_in_before: bounds.checked_in_before,
            checked_in_after: bounds.checked_in_after,
            created_before: bounds.created_before,
            created_after: bounds.created_after,
        })
    }

    /// Parses and validates the four bounds from request parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidTimestamp`] naming the first missing or
    /// malformed parameter, or [`FilterError::Impossible`].
    pub fn from_params<P: ParamSource + ?Sized>(source: &P) -> Result<Self, FilterError> {
        Self::new(ClusterAgeBounds {
            checked_in_before: required_bound(source, FilterKey::CheckedInBefore)?,
            checked_in_after: required_bound(source, FilterKey::CheckedInAfter)?,
            created_before: required_bound(source, FilterKey::CreatedBefore)?,
            created_after: required_bound(source, FilterKey::CreatedAfter)?,
        })
    }

    /// Latest check-in upper bound.
    #[must_use]
    pub const fn checked_in_before(&self) -> Timestamp {
        self.checked_in_before
    }

    /// First check-in lower bound (check-in window).
    #[must_use]
    pub const fn checked_in_after(&self) -> Timestamp {
        self.checked_in_after
    }

    /// First check-in upper bound (creation window).
    #[must_use]
    pub const fn created_before(&self) -> Timestamp {
        self.created_before
    }

    /// First check-in lower bound (creation window).
    #[must_use]
    pub const fn created_after(&self) -> Timestamp {
        self.created_after
    }
}

impl TryFrom<ClusterAgeBounds> for ClusterAgeFilter {
    type Error = FilterError;

    fn try_from(bounds: ClusterAgeBounds) -> Result<Self, Self::Error> {
        Self::new(bounds)
    }
}

// ============================================================================
// SECTION: Cluster Checkins Filter
// ============================================================================

/// Unvalidated bounds of a [`ClusterCheckinsFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCheckinsBounds {
    /// First check-in must be strictly after this instant.
    pub created_after: Timestamp,
    /// First check-in must be strictly before this instant.
    pub created_before: Timestamp,
}

/// Selects clusters whose first check-in falls inside an open window.
///
/// # Invariants
/// - `created_after < created_before`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClusterCheckinsBounds")]
pub struct ClusterCheckinsFilter {
    /// Window start (exclusive).
    created_after: Timestamp,
    /// Window end (exclusive).
    created_before: Timestamp,
}

impl ClusterCheckinsFilter {
    /// Validates bounds and builds the filter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Impossible`] when the window is empty.
    pub fn new(bounds: ClusterCheckinsBounds) -> Result<Self, FilterError> {
        require_greater(
            FilterInvariant::CreatedWindowOrdered,
            FilterBound::new(FilterKey::CreatedBefore, bounds.created_before),
            FilterBound::new(FilterKey::CreatedAfter, bounds.created_after),
            false,
        )?;
        Ok(Self {
            created_after: bounds.created_after,
            created_before: bounds.created_before,
        })
    }

    /// Parses and validates both bounds from request parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidTimestamp`] or [`FilterError::Impossible`].
    pub fn from_params<P: ParamSource + ?Sized>(source: &P) -> Result<Self, FilterError> {
        Self::new(ClusterCheckinsBounds {
            created_after: required_bound(source, FilterKey::CreatedAfter)?,
            created_before: required_bound(source, FilterKey::CreatedBefore)?,
        })
    }

    /// Window start (exclusive).
    #[must_use]
    pub const fn created_after(&self) -> Timestamp {
        self.created_after
    }

    /// Window end (exclusive).
    #[must_use]
    pub const fn created_before(&self) -> Timestamp {
        self.created_before
    }
}

impl TryFrom<ClusterCheckinsBounds> for ClusterCheckinsFilter {
    type Error = FilterError;

    fn try_from(bounds: ClusterCheckinsBounds) -> Result<Self, Self::Error> {
        Self::new(bounds)
    }
}

// ============================================================================
// SECTION: Persistent Clusters Filter
// ============================================================================

/// Look-back applied to `timestamp` to derive `relative_yesterday`.
pub const PERSISTENT_LOOKBACK: Duration = Duration::hours(24);

/// Unvalidated bounds of a [`PersistentClustersFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentClustersBounds {
    /// First check-in must be strictly after this instant.
    pub epoch: Timestamp,
    /// First check-in must be strictly before this instant.
    pub timestamp: Timestamp,
}

/// Selects clusters first seen inside `(epoch, timestamp)`, with more than
/// one check-in, that were still checking in during the day before
/// `timestamp`.
///
/// # Invariants
/// - `epoch < timestamp`
/// - `relative_yesterday == timestamp - 24h`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PersistentClustersBounds")]
pub struct PersistentClustersFilter {
    /// First check-in lower bound.
    epoch: Timestamp,
    /// First check-in upper bound.
    timestamp: Timestamp,
    /// Latest check-in lower bound.
    relative_yesterday: Timestamp,
}

impl PersistentClustersFilter {
    /// Validates bounds, derives `relative_yesterday`, and builds the filter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Impossible`] when `epoch >= timestamp`, or
    /// [`FilterError::OutOfRange`] when the look-back underflows.
    pub fn new(bounds: PersistentClustersBounds) -> Result<Self, FilterError> {
        require_greater(
            FilterInvariant::PersistentWindowOrdered,
            FilterBound::new(FilterKey::Timestamp, bounds.timestamp),
            FilterBound::new(FilterKey::Epoch, bounds.epoch),
            false,
        )?;
        let relative_yesterday = bounds.timestamp.checked_sub(PERSISTENT_LOOKBACK).ok_or_else(|| {
            FilterError::OutOfRange(format!("timestamp {} minus 24h", bounds.timestamp))
        })?;
        Ok(Self {
            epoch: bounds.epoch,
            timestamp: bounds.timestamp,
            relative_yesterday,
        })
    }

    /// Parses and validates both bounds from request parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidTimestamp`] or [`FilterError::Impossible`].
    pub fn from_params<P: ParamSource + ?Sized>(source: &P) -> Result<Self, FilterError> {
        Self::new(PersistentClustersBounds {
            epoch: required_bound(source, FilterKey::Epoch)?,
            timestamp: required_bound(source, FilterKey::Timestamp)?,
        })
    }

    /// First check-in lower bound.
    #[must_use]
    pub const fn epoch(&self) -> Timestamp {
        self.epoch
    }

    /// First check-in upper bound.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Latest check-in lower bound (`timestamp - 24h`).
    #[must_use]
    pub const fn relative_yesterday(&self) -> Timestamp {
        self.relative_yesterday
    }
}

impl TryFrom<PersistentClustersBounds> for PersistentClustersFilter {
    type Error = FilterError;

    fn try_from(bounds: PersistentClustersBounds) -> Result<Self, Self::Error> {
        Self::new(bounds)
    }
}

// ============================================================================
// SECTION: Filter Variants
// ============================================================================

/// Closed set of validated filters accepted by the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeFilter {
    /// Cluster age filter.
    ClusterAge(ClusterAgeFilter),
    /// Cluster checkins filter.
    ClusterCheckins(ClusterCheckinsFilter),
    /// Persistent clusters filter.
    PersistentClusters(PersistentClustersFilter),
}

impl TimeFilter {
    /// Returns a stable label of the variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ClusterAge(_) => "cluster_age",
            Self::ClusterCheckins(_) => "cluster_checkins",
            Self::PersistentClusters(_) => "persistent_clusters",
        }
    }
}

impl From<ClusterAgeFilter> for TimeFilter {
    fn from(filter: ClusterAgeFilter) -> Self {
        Self::ClusterAge(filter)
    }
}

impl From<ClusterCheckinsFilter> for TimeFilter {
    fn from(filter: ClusterCheckinsFilter) -> Self {
        Self::ClusterCheckins(filter)
    }
}

impl From<PersistentClustersFilter> for TimeFilter {
    fn from(filter: PersistentClustersFilter) -> Self {
        Self::PersistentClusters(filter)
    }
}
