// crates/fleet-checkin-store-sqlite/src/lib.rs
// ============================================================================
// Module: Fleet Check-in SQLite Store
// Description: Durable check-in ledger and version catalog on SQLite.
// Purpose: Provide the production backend for the core store interfaces.
// Dependencies: fleet-checkin-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This crate implements [`fleet_checkin_core::CheckinStore`] and
//! [`fleet_checkin_core::VersionStore`] on `SQLite`. Writes are
//! transactional, payloads are stored verbatim with digests, and loads
//! fail closed on corruption.
//! Invariants:
//! - Each upsert commits its check-in and cluster row together or not at all.
//! - Schema versions other than the supported one are rejected on open.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::LATEST_BATCH_CHUNK;
pub use store::MAX_POOL_SIZE;
pub use store::SqliteCheckinStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
pub use store::UpsertStrategy;
