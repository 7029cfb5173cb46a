// crates/fleet-checkin-core/src/core/records.rs
// ============================================================================
// Module: Fleet Check-in Records
// Description: Cluster, check-in, and component version domain records.
// Purpose: Define the shapes the stores persist and return.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Cluster and version records are created on first write and replaced in
//! place afterwards. Check-in records are append-only facts; the minimum and
//! maximum of a cluster's check-in instants define its observed age window.
//! Payloads are opaque JSON values that storage round-trips without
//! interpretation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ClusterId;
use crate::core::identifiers::ComponentName;
use crate::core::identifiers::Train;
use crate::core::identifiers::TrainKey;
use crate::core::identifiers::VersionKey;
use crate::core::identifiers::VersionName;
use crate::core::time::InvalidTimestamp;
use crate::core::time::Timestamp;
use crate::core::time::parse_field;

// ============================================================================
// SECTION: Cluster Records
// ============================================================================

/// Current state of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    /// Cluster identifier.
    pub cluster_id: ClusterId,
    /// Latest reported inventory payload.
    pub payload: Value,
}

/// Immutable observation of a cluster at an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinRecord {
    /// Cluster identifier.
    pub cluster_id: ClusterId,
    /// Observation instant.
    pub created_at: Timestamp,
    /// Payload snapshot at the observation instant.
    pub payload: Value,
}

/// Outcome of the create-or-update step of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No row existed; one was inserted.
    Created,
    /// An existing row was overwritten.
    Updated,
    /// The insert lost a race on the unique key and was applied as an update.
    RecoveredAsUpdate,
}

impl UpsertOutcome {
    /// Returns a stable label for audit output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::RecoveredAsUpdate => "recovered_as_update",
        }
    }
}

// ============================================================================
// SECTION: Version Records
// ============================================================================

/// A released component version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersion {
    /// Component name.
    pub component: ComponentName,
    /// Release train.
    pub train: Train,
    /// Version string.
    pub version: VersionName,
    /// Release instant.
    pub released_at: Timestamp,
    /// Opaque release payload.
    pub payload: Value,
}

impl ComponentVersion {
    /// Returns the unique key of this version.
    #[must_use]
    pub fn key(&self) -> VersionKey {
        VersionKey {
            component: self.component.clone(),
            train: self.train.clone(),
            version: self.version.clone(),
        }
    }

    /// Returns the (component, train) pair of this version.
    #[must_use]
    pub fn train_key(&self) -> TrainKey {
        TrainKey {
            component: self.component.clone(),
            train: self.train.clone(),
        }
    }
}

/// Caller-submitted version whose release instant is still raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSubmission {
    /// Component name.
    pub component: ComponentName,
    /// Release train.
    pub train: Train,
    /// Version string.
    pub version: VersionName,
    /// Release instant in RFC3339.
    pub released_at: String,
    /// Opaque release payload.
    #[serde(default)]
    pub payload: Value,
}

impl VersionSubmission {
    /// Parses the release instant into a [`ComponentVersion`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTimestamp`] for field `released_at` when parsing fails.
    pub fn parse(&self) -> Result<ComponentVersion, InvalidTimestamp> {
        let released_at = parse_field("released_at", &self.released_at)?;
        Ok(ComponentVersion {
            component: self.component.clone(),
            train: self.train.clone(),
            version: self.version.clone(),
            released_at,
            payload: self.payload.clone(),
        })
    }
}
