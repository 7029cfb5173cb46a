// crates/fleet-checkin-core/tests/query_translation.rs
// ============================================================================
// Module: Filter Query Translation Tests
// Description: SQL rendering and in-memory evaluation of filter predicates.
// Purpose: Pin the exact aggregate inequalities of every filter.
// ============================================================================

//! Query translator tests.

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
use fleet_checkin_core::TimeFilter;
use fleet_checkin_core::Timestamp;
use fleet_checkin_core::ToPredicate;

const HOUR_NANOS: i64 = 3_600_000_000_000;

fn hours(offset: i64) -> Timestamp {
    Timestamp::from_unix_nanos(1_700_000_000_000_000_000 + offset * HOUR_NANOS)
}

fn age_filter() -> ClusterAgeFilter {
    ClusterAgeFilter::new(ClusterAgeBounds {
        checked_in_before: hours(1),
        checked_in_after: hours(-3),
        created_before: hours(0),
        created_after: hours(-2),
    })
    .unwrap()
}

fn stats(instants: &[i64]) -> Option<CheckinStats> {
    CheckinStats::from_instants(instants.iter().map(|offset| hours(*offset)))
}

#[test]
fn cluster_age_renders_four_terms() {
    let predicate = age_filter().predicate();
    assert_eq!(
        predicate.having_clause(1),
        "MIN(created_at) > ?1 AND MIN(created_at) < ?2 AND MIN(created_at) > ?3 AND \
         MAX(created_at) < ?4"
    );
    assert_eq!(
        predicate.sql_params(),
        vec![
            hours(-2).unix_nanos(),
            hours(0).unix_nanos(),
            hours(-3).unix_nanos(),
            hours(1).unix_nanos()
        ]
    );
    assert_eq!(
        predicate.matching_clusters_sql(),
        "SELECT cluster_id FROM checkins GROUP BY cluster_id HAVING MIN(created_at) > ?1 AND \
         MIN(created_at) < ?2 AND MIN(created_at) > ?3 AND MAX(created_at) < ?4"
    );
}

#[test]
fn persistent_renders_count_term() {
    let filter = PersistentClustersFilter::new(PersistentClustersBounds {
        epoch: hours(-100),
        timestamp: hours(0),
    })
    .unwrap();
    let predicate = TimeFilter::from(filter).predicate();
    assert_eq!(
        predicate.having_clause(1),
        "MIN(created_at) > ?1 AND MIN(created_at) < ?2 AND COUNT(*) > ?3 AND MAX(created_at) > ?4"
    );
    assert_eq!(predicate.sql_params()[2], 1);
    assert_eq!(predicate.sql_params()[3], hours(-24).unix_nanos());
}

#[test]
fn cluster_checkins_offsets_parameter_numbers() {
    let filter = ClusterCheckinsFilter::new(ClusterCheckinsBounds {
        created_after: hours(-1),
        created_before: hours(1),
    })
    .unwrap();
    assert_eq!(filter.predicate().having_clause(3), "MIN(created_at) > ?3 AND MIN(created_at) < ?4");
}

#[test]
fn cluster_age_matches_inside_window() {
    let predicate = age_filter().predicate();
    assert!(predicate.matches(stats(&[-1, 0]).as_ref()));
    assert!(predicate.matches(stats(&[-1]).as_ref()));
}

#[test]
fn cluster_age_bounds_are_strict() {
    let predicate = age_filter().predicate();
    // First check-in exactly at created_after.
    assert!(!predicate.matches(stats(&[-2, 0]).as_ref()));
    // First check-in exactly at created_before.
    assert!(!predicate.matches(stats(&[0]).as_ref()));
    // Last check-in exactly at checked_in_before.
    assert!(!predicate.matches(stats(&[-1, 1]).as_ref()));
}

#[test]
fn cluster_age_checked_in_after_is_strict_when_it_binds() {
    // checked_in_after sits above created_after, so it is the effective floor.
    let predicate = ClusterAgeFilter::new(ClusterAgeBounds {
        checked_in_before: hours(2),
        checked_in_after: hours(-1),
        created_before: hours(1),
        created_after: hours(-3),
    })
    .unwrap()
    .predicate();
    assert!(predicate.matches(stats(&[0, 1]).as_ref()));
    // First check-in exactly at checked_in_after.
    assert!(!predicate.matches(stats(&[-1, 0]).as_ref()));
    // Between created_after and checked_in_after.
    assert!(!predicate.matches(stats(&[-2, 0]).as_ref()));
}

#[test]
fn clusters_without_checkins_never_match() {
    assert!(!age_filter().predicate().matches(None));
    assert_eq!(CheckinStats::from_instants(std::iter::empty()), None);
}

#[test]
fn persistent_requires_more_than_one_checkin() {
    let filter = PersistentClustersFilter::new(PersistentClustersBounds {
        epoch: hours(-100),
        timestamp: hours(0),
    })
    .unwrap();
    let predicate = filter.predicate();
    assert!(!predicate.matches(stats(&[-50]).as_ref()));
    assert!(predicate.matches(stats(&[-50, -1]).as_ref()));
    // Last check-in at exactly relative_yesterday does not count as recent.
    assert!(!predicate.matches(stats(&[-50, -24]).as_ref()));
}
