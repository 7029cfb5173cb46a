// crates/fleet-checkin-core/src/runtime/mod.rs
// ============================================================================
// Module: Fleet Check-in Runtime
// Description: In-memory store, audit sinks, and clocks.
// Purpose: Provide dependency-free implementations of the core interfaces.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement the core interfaces without external services.
//! The durable `SQLite` backend lives in its own crate.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod clock;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use clock::FixedClock;
pub use clock::SystemClock;
pub use store::InMemoryCheckinStore;
