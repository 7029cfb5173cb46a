// crates/fleet-checkin-core/tests/proptest_filters.rs
// ============================================================================
// Module: Filter Property-Based Tests
// Description: Property tests for filter validation and predicate evaluation.
// Purpose: A filter exists exactly when its invariants hold; predicates agree
//          with a direct reading of the bounds.
// ============================================================================

//! Property-based tests for filter invariants.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use fleet_checkin_core::CheckinStats;
use fleet_checkin_core::ClusterAgeBounds;
use fleet_checkin_core::ClusterAgeFilter;
use fleet_checkin_core::ClusterCheckinsBounds;
use fleet_checkin_core::ClusterCheckinsFilter;
use fleet_checkin_core::PersistentClustersBounds;
use fleet_checkin_core::PersistentClustersFilter;
use fleet_checkin_core::Timestamp;
use fleet_checkin_core::ToPredicate;
use proptest::prelude::*;

const HOUR_NANOS: i64 = 3_600_000_000_000;

fn instant() -> impl Strategy<Value = Timestamp> {
    (-2000_i64 .. 2000).prop_map(|hours| Timestamp::from_unix_nanos(hours * HOUR_NANOS))
}

proptest! {
    #[test]
    fn cluster_age_valid_iff_invariants_hold(
        checked_in_before in instant(),
        checked_in_after in instant(),
        created_before in instant(),
        created_after in instant(),
    ) {
        let expected = created_before <= checked_in_before
            && checked_in_after < checked_in_before
            && created_after < created_before
            && checked_in_before > created_after;
        let result = ClusterAgeFilter::new(ClusterAgeBounds {
            checked_in_before,
            checked_in_after,
            created_before,
            created_after,
        });
        prop_assert_eq!(result.is_ok(), expected);
    }

    #[test]
    fn cluster_checkins_valid_iff_window_open(created_after in instant(), created_before in instant()) {
        let result = ClusterCheckinsFilter::new(ClusterCheckinsBounds { created_after, created_before });
        prop_assert_eq!(result.is_ok(), created_after < created_before);
    }

    #[test]
    fn persistent_valid_iff_epoch_before_timestamp(epoch in instant(), timestamp in instant()) {
        let result = PersistentClustersFilter::new(PersistentClustersBounds { epoch, timestamp });
        prop_assert_eq!(result.is_ok(), epoch < timestamp);
    }

    #[test]
    fn persistent_predicate_matches_direct_reading(
        epoch in instant(),
        span in 1_i64 .. 500,
        offsets in prop::collection::vec(-600_i64 .. 600, 0 .. 6),
    ) {
        let timestamp = Timestamp::from_unix_nanos(epoch.unix_nanos() + span * HOUR_NANOS);
        let filter = PersistentClustersFilter::new(PersistentClustersBounds { epoch, timestamp }).unwrap();
        let instants: Vec<Timestamp> = offsets
            .iter()
            .map(|offset| Timestamp::from_unix_nanos(epoch.unix_nanos() + offset * HOUR_NANOS))
            .collect();
        let stats = CheckinStats::from_instants(instants.iter().copied());
        let expected = match (instants.iter().min(), instants.iter().max()) {
            (Some(first), Some(last)) => *first > epoch
                && *first < timestamp
                && instants.len() > 1
                && *last > filter.relative_yesterday(),
            _ => false,
        };
        prop_assert_eq!(filter.predicate().matches(stats.as_ref()), expected);
    }
}
