// crates/fleet-checkin-config/src/lib.rs
// ============================================================================
// Module: Fleet Check-in Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for fleet-checkin.toml semantics.
// Dependencies: fleet-checkin-core, fleet-checkin-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `fleet-checkin-config` defines the configuration model for the fleet
//! check-in ledger: store backend selection, `SQLite` tuning, and the audit
//! sink. Validation is strict and fails closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
