// crates/fleet-checkin-core/src/core/audit.rs
// ============================================================================
// Module: Fleet Check-in Store Audit Events
// Description: Structured audit payloads for store writes.
// Purpose: Describe every write and failed transaction as one JSON line.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Stores describe writes with [`StoreAuditEvent`] and hand them to a
//! [`crate::StoreAuditSink`]. Payload contents are never included; only the
//! natural key and the outcome are recorded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Store operation classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOperation {
    /// Cluster create-or-update.
    UpsertCluster,
    /// Standalone check-in append.
    CheckIn,
    /// Version create-or-update.
    UpsertVersion,
}

/// Store audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct StoreAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Operation that produced the event.
    pub operation: StoreOperation,
    /// Natural key of the affected record.
    pub key: String,
    /// Outcome label (`created`, `updated`, `failed`, ...).
    pub outcome: &'static str,
    /// Optional detail, e.g. an error message.
    pub detail: Option<String>,
}

impl StoreAuditEvent {
    /// Creates a write event with a consistent timestamp.
    #[must_use]
    pub fn write(operation: StoreOperation, key: impl Into<String>, outcome: &'static str) -> Self {
        Self::build("store_write", operation, key.into(), outcome, None)
    }

    /// Creates a failure event carrying the error message.
    #[must_use]
    pub fn failure(operation: StoreOperation, key: impl Into<String>, detail: String) -> Self {
        Self::build("store_failure", operation, key.into(), "failed", Some(detail))
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Shared constructor.
    fn build(
        event: &'static str,
        operation: StoreOperation,
        key: String,
        outcome: &'static str,
        detail: Option<String>,
    ) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            operation,
            key,
            outcome,
            detail,
        }
    }
}
