// crates/fleet-checkin-core/src/core/latest.rs
// ============================================================================
// Module: Fleet Check-in Latest-Version Resolution
// Description: Selects one version per (component, train) pair.
// Purpose: Share one ordering rule between the in-memory and SQLite stores.
// Dependencies: crate::core::{identifiers, records}
// ============================================================================

//! ## Overview
//! The latest version of a train is the one with the greatest `released_at`.
//! Ties are broken by write sequence: the version first inserted later wins.
//! Batch requests are deduplicated and answered in first-occurrence order;
//! pairs with no versions are omitted rather than reported as errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::core::identifiers::TrainKey;
use crate::core::records::ComponentVersion;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Ordering
// ============================================================================

/// A stored version together with its insertion sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedVersion {
    /// Monotonic insertion sequence (row id).
    pub sequence: i64,
    /// Stored version.
    pub version: ComponentVersion,
}

impl SequencedVersion {
    /// Returns the ordering key used for latest-version selection.
    #[must_use]
    pub const fn rank(&self) -> (Timestamp, i64) {
        (self.version.released_at, self.sequence)
    }
}

/// Deduplicates pairs, keeping first-occurrence order.
#[must_use]
pub fn distinct_pairs(pairs: &[TrainKey]) -> Vec<TrainKey> {
    let mut seen = BTreeSet::new();
    pairs.iter().filter(|pair| seen.insert((*pair).clone())).cloned().collect()
}

/// Resolves the latest version of each requested pair from candidate rows.
///
/// Candidates outside the requested pairs are ignored. The result holds at
/// most one version per distinct pair, in first-occurrence order.
pub fn resolve_latest<I>(pairs: &[TrainKey], candidates: I) -> Vec<ComponentVersion>
where
    I: IntoIterator<Item = SequencedVersion>,
{
    let requested = distinct_pairs(pairs);
    let wanted: BTreeSet<&TrainKey> = requested.iter().collect();
    let mut best: BTreeMap<TrainKey, SequencedVersion> = BTreeMap::new();
    for candidate in candidates {
        let key = candidate.version.train_key();
        if !wanted.contains(&key) {
            continue;
        }
        match best.get(&key) {
            Some(current) if current.rank() >= candidate.rank() => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }
    requested.iter().filter_map(|pair| best.remove(pair)).map(|entry| entry.version).collect()
}
