// crates/fleet-checkin-core/src/lib.rs
// ============================================================================
// Module: Fleet Check-in Core Library
// Description: Public API surface for the fleet check-in ledger core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Fleet check-in core records periodic check-ins from deployed clusters,
//! answers time-window queries over their check-in history, and resolves the
//! latest released version of each component train. It is backend-agnostic
//! and integrates through explicit store interfaces.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::CheckinStore;
pub use interfaces::Clock;
pub use interfaces::DEFAULT_MAX_PAYLOAD_BYTES;
pub use interfaces::StoreAuditSink;
pub use interfaces::StoreError;
pub use interfaces::VersionStore;
pub use interfaces::validate_identifier;
pub use interfaces::validate_payload_size;
pub use runtime::FileAuditSink;
pub use runtime::FixedClock;
pub use runtime::InMemoryCheckinStore;
pub use runtime::MemoryAuditSink;
pub use runtime::NoopAuditSink;
pub use runtime::StderrAuditSink;
pub use runtime::SystemClock;
