// crates/fleet-checkin-core/src/runtime/clock.rs
// ============================================================================
// Module: Fleet Check-in Clocks
// Description: Wall-clock and fixed clock implementations.
// Purpose: Make the check-in instant of cluster upserts injectable.
// Dependencies: crate::{core, interfaces}, time
// ============================================================================

//! ## Overview
//! [`SystemClock`] reads the wall clock. [`FixedClock`] returns a settable
//! instant and is shared across threads in tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use time::Duration;

use crate::core::Timestamp;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: Clocks
// ============================================================================

/// Wall-clock time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now_utc()
    }
}

/// Settable time source.
#[derive(Debug)]
pub struct FixedClock {
    /// Current instant in unix nanoseconds.
    unix_nanos: AtomicI64,
}

impl FixedClock {
    /// Creates a clock frozen at `at`.
    #[must_use]
    pub const fn new(at: Timestamp) -> Self {
        Self {
            unix_nanos: AtomicI64::new(at.unix_nanos()),
        }
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        self.unix_nanos.store(at.unix_nanos(), Ordering::SeqCst);
    }

    /// Moves the clock forward, saturating at the representable maximum.
    pub fn advance(&self, by: Duration) {
        let next = self.now().checked_add(by).unwrap_or(Timestamp::from_unix_nanos(i64::MAX));
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_nanos(self.unix_nanos.load(Ordering::SeqCst))
    }
}
