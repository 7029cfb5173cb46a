// crates/fleet-checkin-core/tests/latest_resolver.rs
// ============================================================================
// Module: Latest-Version Resolver Tests
// Description: Ordering, tie-breaking, and batch shaping of latest versions.
// Purpose: Pin the ordering rule shared by every store backend.
// ============================================================================

//! Latest-version resolver tests.

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

use fleet_checkin_core::ComponentVersion;
use fleet_checkin_core::SequencedVersion;
use fleet_checkin_core::Timestamp;
use fleet_checkin_core::TrainKey;
use fleet_checkin_core::distinct_pairs;
use fleet_checkin_core::resolve_latest;
use serde_json::Value;

fn row(sequence: i64, component: &str, train: &str, version: &str, released_at: &str) -> SequencedVersion {
    SequencedVersion {
        sequence,
        version: ComponentVersion {
            component: component.into(),
            train: train.into(),
            version: version.into(),
            released_at: Timestamp::parse_rfc3339(released_at).unwrap(),
            payload: Value::Null,
        },
    }
}

#[test]
fn greatest_release_instant_wins_regardless_of_row_order() {
    let rows = vec![
        row(1, "api", "stable", "1.2.0", "2024-06-03T00:00:00Z"),
        row(2, "api", "stable", "1.0.0", "2024-06-01T00:00:00Z"),
        row(3, "api", "stable", "1.1.0", "2024-06-02T00:00:00Z"),
    ];
    let latest = resolve_latest(&[TrainKey::new("api", "stable")], rows);
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].version.as_str(), "1.2.0");
}

#[test]
fn equal_release_instants_prefer_later_insertion() {
    let rows = vec![
        row(7, "api", "stable", "1.0.1", "2024-06-01T00:00:00Z"),
        row(4, "api", "stable", "1.0.0", "2024-06-01T00:00:00Z"),
    ];
    let latest = resolve_latest(&[TrainKey::new("api", "stable")], rows);
    assert_eq!(latest[0].version.as_str(), "1.0.1");
}

#[test]
fn unrequested_pairs_are_ignored() {
    let rows = vec![
        row(1, "api", "beta", "2.0.0", "2024-06-09T00:00:00Z"),
        row(2, "api", "stable", "1.0.0", "2024-06-01T00:00:00Z"),
    ];
    let latest = resolve_latest(&[TrainKey::new("api", "stable")], rows);
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].train.as_str(), "stable");
}

#[test]
fn distinct_pairs_keeps_first_occurrence_order() {
    let pairs = vec![
        TrainKey::new("b", "x"),
        TrainKey::new("a", "x"),
        TrainKey::new("b", "x"),
    ];
    assert_eq!(distinct_pairs(&pairs), vec![TrainKey::new("b", "x"), TrainKey::new("a", "x")]);
}
