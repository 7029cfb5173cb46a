// crates/fleet-checkin-core/src/interfaces/mod.rs
// ============================================================================
// Module: Fleet Check-in Interfaces
// Description: Backend-agnostic store, audit, and clock interfaces.
// Purpose: Define the contract surfaces every store backend implements.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Store traits describe the cluster check-in ledger and the component
//! version catalog. Implementations must apply the shared filter predicates
//! and latest-version ordering from [`crate::core`] and fail closed on
//! corrupt or oversized data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

use crate::core::CheckinRecord;
use crate::core::ClusterAgeFilter;
use crate::core::ClusterCheckinsFilter;
use crate::core::ClusterId;
use crate::core::ClusterRecord;
use crate::core::ComponentName;
use crate::core::ComponentVersion;
use crate::core::InvalidTimestamp;
use crate::core::MAX_IDENTIFIER_LENGTH;
use crate::core::PersistentClustersFilter;
use crate::core::StoreAuditEvent;
use crate::core::TimeFilter;
use crate::core::Timestamp;
use crate::core::Train;
use crate::core::TrainKey;
use crate::core::VersionKey;
use crate::core::VersionSubmission;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Default maximum encoded payload size (bytes).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - [`StoreError::is_client_error`] and [`StoreError::is_retryable`] never
///   both hold.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient I/O failure (busy database, lock timeout).
    #[error("check-in store io error: {0}")]
    Io(String),
    /// Input rejected before any write.
    #[error("check-in store invalid input: {0}")]
    Invalid(String),
    /// Stored data fails integrity checks.
    #[error("check-in store corruption: {0}")]
    Corrupt(String),
    /// Stored schema version is incompatible.
    #[error("check-in store version mismatch: {0}")]
    VersionMismatch(String),
    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Transaction failed; `rollback` carries a failed rollback or commit.
    #[error("transaction failed: {error}{}", rollback_suffix(.rollback.as_deref()))]
    Transaction {
        /// Original failure.
        error: String,
        /// Rollback or commit failure, when cleanup also failed.
        rollback: Option<String>,
    },
    /// A write affected an unexpected number of rows.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
    /// Payload exceeds the configured size limit.
    #[error("payload too large: {actual_bytes} bytes exceeds limit of {max_bytes}")]
    TooLarge {
        /// Configured limit.
        max_bytes: usize,
        /// Encoded payload size.
        actual_bytes: usize,
    },
    /// A submitted instant failed to parse.
    #[error(transparent)]
    InvalidTimestamp(#[from] InvalidTimestamp),
    /// Backend reported a non-transient error.
    #[error("check-in store error: {0}")]
    Store(String),
}

impl StoreError {
    /// Returns true when the caller supplied bad input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Invalid(_) | Self::InvalidTimestamp(_) | Self::TooLarge { .. })
    }

    /// Returns true when the same call may succeed if retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Formats the optional cleanup failure of a transaction error.
fn rollback_suffix(rollback: Option<&str>) -> String {
    rollback.map(|detail| format!(" (rollback failed: {detail})")).unwrap_or_default()
}

/// Rejects empty or oversized identifiers.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] naming `field`.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::Invalid(format!("{field} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(StoreError::Invalid(format!(
            "{field} exceeds {MAX_IDENTIFIER_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Rejects encoded payloads above `max_bytes`.
///
/// # Errors
///
/// Returns [`StoreError::TooLarge`] when the limit is exceeded.
pub fn validate_payload_size(actual_bytes: usize, max_bytes: usize) -> Result<(), StoreError> {
    if actual_bytes > max_bytes {
        return Err(StoreError::TooLarge {
            max_bytes,
            actual_bytes,
        });
    }
    Ok(())
}

// ============================================================================
// SECTION: Check-in Store
// ============================================================================

/// Cluster check-in ledger.
pub trait CheckinStore {
    /// Records a check-in at the current instant and creates or replaces the
    /// cluster record, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when validation or the transaction fails.
    fn upsert_cluster(&self, cluster_id: &ClusterId, payload: &Value) -> Result<ClusterRecord, StoreError>;

    /// Appends one immutable check-in.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or inserts nothing.
    fn check_in(
        &self,
        cluster_id: &ClusterId,
        created_at: Timestamp,
        payload: &Value,
    ) -> Result<CheckinRecord, StoreError>;

    /// Loads a cluster record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the cluster is unknown.
    fn get_cluster(&self, cluster_id: &ClusterId) -> Result<ClusterRecord, StoreError>;

    /// Lists a cluster's check-ins in chronological order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn list_checkins(&self, cluster_id: &ClusterId) -> Result<Vec<CheckinRecord>, StoreError>;

    /// Returns cluster records whose check-in aggregates satisfy `filter`,
    /// ordered by cluster identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn query_clusters(&self, filter: &TimeFilter) -> Result<Vec<ClusterRecord>, StoreError>;

    /// Runs a cluster age query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn query_cluster_age(&self, filter: &ClusterAgeFilter) -> Result<Vec<ClusterRecord>, StoreError> {
        self.query_clusters(&TimeFilter::ClusterAge(*filter))
    }

    /// Runs a cluster checkins query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn query_cluster_checkins(
        &self,
        filter: &ClusterCheckinsFilter,
    ) -> Result<Vec<ClusterRecord>, StoreError> {
        self.query_clusters(&TimeFilter::ClusterCheckins(*filter))
    }

    /// Runs a persistent clusters query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn query_persistent_clusters(
        &self,
        filter: &PersistentClustersFilter,
    ) -> Result<Vec<ClusterRecord>, StoreError> {
        self.query_clusters(&TimeFilter::PersistentClusters(*filter))
    }

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Version Store
// ============================================================================

/// Component version catalog.
pub trait VersionStore {
    /// Parses, then creates or replaces a version keyed by
    /// (component, train, version).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTimestamp`] before any write when
    /// `released_at` does not parse, or [`StoreError`] when the write fails.
    fn upsert_version(&self, submission: &VersionSubmission) -> Result<ComponentVersion, StoreError>;

    /// Loads one version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no row matches.
    fn get_version(&self, key: &VersionKey) -> Result<ComponentVersion, StoreError>;

    /// Loads the most recently released version of a train.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the train has no versions.
    fn get_latest_version(
        &self,
        train: &Train,
        component: &ComponentName,
    ) -> Result<ComponentVersion, StoreError>;

    /// Loads the latest version of each distinct pair; pairs without
    /// versions are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn get_latest_versions(&self, pairs: &[TrainKey]) -> Result<Vec<ComponentVersion>, StoreError>;

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Sink for store audit events.
pub trait StoreAuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &StoreAuditEvent);
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}
