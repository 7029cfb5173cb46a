// crates/fleet-checkin-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Ledger, filter queries, version catalog, and integrity checks.
// Purpose: Validate the SQLite backend against the shared store contract.
// ============================================================================

//! ## Overview
//! Integration tests for the `SQLite` backend:
//! - Filter scenarios, strict boundaries, and clusters without check-ins
//! - Version round-trips, overwrites, latest lookups, and chunked batches
//! - Concurrent first upserts of the same cluster
//! - Path safety, size limits, corruption, and schema version checks

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

use std::path::Path;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;

use fleet_checkin_core::CheckinStore;
use fleet_checkin_core::ClusterAgeBounds;
use fleet_checkin_core::ClusterAgeFilter;
use fleet_checkin_core::ClusterCheckinsBounds;
use fleet_checkin_core::ClusterCheckinsFilter;
use fleet_checkin_core::ClusterId;
use fleet_checkin_core::FixedClock;
use fleet_checkin_core::InMemoryCheckinStore;
use fleet_checkin_core::MemoryAuditSink;
use fleet_checkin_core::PersistentClustersBounds;
use fleet_checkin_core::PersistentClustersFilter;
use fleet_checkin_core::StoreError;
use fleet_checkin_core::Timestamp;
use fleet_checkin_core::TrainKey;
use fleet_checkin_core::VersionKey;
use fleet_checkin_core::VersionStore;
use fleet_checkin_core::VersionSubmission;
use fleet_checkin_store_sqlite::LATEST_BATCH_CHUNK;
use fleet_checkin_store_sqlite::SqliteCheckinStore;
use fleet_checkin_store_sqlite::SqliteStoreConfig;
use fleet_checkin_store_sqlite::SqliteStoreError;
use fleet_checkin_store_sqlite::SqliteSyncMode;
use fleet_checkin_store_sqlite::UpsertStrategy;
use proptest::prelude::*;
use rusqlite::Connection;
use rusqlite::params;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const HOUR_NANOS: i64 = 3_600_000_000_000;

fn now() -> Timestamp {
    Timestamp::parse_rfc3339("2024-06-01T12:00:00Z").unwrap()
}

fn hours(offset: i64) -> Timestamp {
    Timestamp::from_unix_nanos(now().unix_nanos() + offset * HOUR_NANOS)
}

fn config_for(path: &Path, strategy: UpsertStrategy) -> SqliteStoreConfig {
    let mut config = SqliteStoreConfig::new(path);
    config.sync_mode = SqliteSyncMode::Normal;
    config.upsert_strategy = strategy;
    config
}

fn store_for(path: &Path) -> SqliteCheckinStore {
    SqliteCheckinStore::new(config_for(path, UpsertStrategy::Atomic)).unwrap()
}

fn submission(component: &str, train: &str, version: &str, released_at: &str) -> VersionSubmission {
    VersionSubmission {
        component: component.into(),
        train: train.into(),
        version: version.into(),
        released_at: released_at.to_string(),
        payload: json!({"notes": version}),
    }
}

fn ids(records: &[fleet_checkin_core::ClusterRecord]) -> Vec<String> {
    records.iter().map(|record| record.cluster_id.to_string()).collect()
}

// ============================================================================
// SECTION: Cluster Ledger
// ============================================================================

#[test]
fn upsert_cluster_records_checkin_and_replaces_payload() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(FixedClock::new(hours(-2)));
    let audit = Arc::new(MemoryAuditSink::default());
    let store = store_for(&temp.path().join("store.sqlite"))
        .with_clock(clock.clone())
        .with_audit_sink(audit.clone());
    let id = ClusterId::new("cluster-a");

    store.upsert_cluster(&id, &json!({"nodes": 3})).unwrap();
    clock.advance(time::Duration::hours(1));
    let updated = store.upsert_cluster(&id, &json!({"nodes": 5})).unwrap();

    assert_eq!(updated.payload, json!({"nodes": 5}));
    assert_eq!(store.get_cluster(&id).unwrap(), updated);
    let checkins = store.list_checkins(&id).unwrap();
    let instants: Vec<Timestamp> = checkins.iter().map(|checkin| checkin.created_at).collect();
    assert_eq!(instants, vec![hours(-2), hours(-1)]);

    let outcomes: Vec<&str> = audit.events().iter().map(|event| event.outcome).collect();
    assert_eq!(outcomes, vec!["created", "updated"]);
}

#[test]
fn data_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    let id = ClusterId::new("cluster-a");
    {
        let store = store_for(&path);
        store.upsert_cluster(&id, &json!({"region": "eu"})).unwrap();
    }
    let store = store_for(&path);
    assert_eq!(store.get_cluster(&id).unwrap().payload, json!({"region": "eu"}));
    assert_eq!(store.list_checkins(&id).unwrap().len(), 1);
}

#[test]
fn unknown_cluster_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    let err = store.get_cluster(&ClusterId::new("missing")).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(!err.is_client_error());
}

#[test]
fn count_then_write_reports_created_then_updated() {
    let temp = TempDir::new().unwrap();
    let audit = Arc::new(MemoryAuditSink::default());
    let config = config_for(&temp.path().join("store.sqlite"), UpsertStrategy::CountThenWrite);
    let store = SqliteCheckinStore::new(config).unwrap().with_audit_sink(audit.clone());
    let id = ClusterId::new("cluster-a");
    store.upsert_cluster(&id, &json!({"v": 1})).unwrap();
    store.upsert_cluster(&id, &json!({"v": 2})).unwrap();
    assert_eq!(store.get_cluster(&id).unwrap().payload, json!({"v": 2}));
    let outcomes: Vec<&str> = audit.events().iter().map(|event| event.outcome).collect();
    assert_eq!(outcomes, vec!["created", "updated"]);
}

#[test]
fn concurrent_first_upserts_leave_one_cluster_row() {
    for strategy in [UpsertStrategy::Atomic, UpsertStrategy::CountThenWrite] {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.sqlite");
        let store = Arc::new(SqliteCheckinStore::new(config_for(&path, strategy)).unwrap());
        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for writer in 0 .. 2 {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                store.upsert_cluster(&ClusterId::new("shared"), &json!({"writer": writer}))
            }));
        }
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        let connection = Connection::open(&path).unwrap();
        let rows: i64 = connection
            .query_row("SELECT COUNT(*) FROM clusters WHERE cluster_id = 'shared'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(store.list_checkins(&ClusterId::new("shared")).unwrap().len(), 2);
    }
}

// ============================================================================
// SECTION: Filter Queries
// ============================================================================

#[test]
fn cluster_age_scenario_excludes_late_checkins() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(FixedClock::new(now()));
    let store = store_for(&temp.path().join("store.sqlite")).with_clock(clock);
    let id = ClusterId::new("cluster-a");
    store.upsert_cluster(&id, &json!({})).unwrap();

    let filter = ClusterAgeFilter::new(ClusterAgeBounds {
        checked_in_before: hours(2),
        checked_in_after: hours(-1),
        created_before: hours(1),
        created_after: hours(-2),
    })
    .unwrap();
    assert_eq!(ids(&store.query_cluster_age(&filter).unwrap()), vec!["cluster-a"]);

    store.check_in(&id, hours(3), &json!({})).unwrap();
    assert!(store.query_cluster_age(&filter).unwrap().is_empty());
}

#[test]
fn filter_bounds_are_strict() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(FixedClock::new(hours(-2)));
    let store = store_for(&temp.path().join("store.sqlite")).with_clock(clock.clone());
    let on_bound = ClusterId::new("on-bound");
    let inside = ClusterId::new("inside");
    store.upsert_cluster(&on_bound, &json!({})).unwrap();
    clock.set(hours(-1));
    store.upsert_cluster(&inside, &json!({})).unwrap();

    let filter = ClusterCheckinsFilter::new(ClusterCheckinsBounds {
        created_after: hours(-2),
        created_before: hours(0),
    })
    .unwrap();
    assert_eq!(ids(&store.query_cluster_checkins(&filter).unwrap()), vec!["inside"]);
}

#[test]
fn clusters_without_checkins_never_match() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    let store = store_for(&path);
    store.upsert_cluster(&ClusterId::new("cluster-a"), &json!({})).unwrap();
    let connection = Connection::open(&path).unwrap();
    connection.execute("DELETE FROM checkins", []).unwrap();

    let filter = ClusterCheckinsFilter::new(ClusterCheckinsBounds {
        created_after: Timestamp::UNIX_EPOCH,
        created_before: Timestamp::now_utc().checked_add(time::Duration::days(1)).unwrap(),
    })
    .unwrap();
    assert!(store.query_cluster_checkins(&filter).unwrap().is_empty());
}

#[test]
fn persistent_clusters_need_repeat_and_recent_checkins() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(FixedClock::new(hours(-60)));
    let store = store_for(&temp.path().join("store.sqlite")).with_clock(clock);
    for (name, offsets) in [("steady", vec![-50, -2]), ("single", vec![]), ("stale", vec![-50, -30])] {
        let id = ClusterId::new(name);
        store.upsert_cluster(&id, &json!({})).unwrap();
        for offset in offsets {
            store.check_in(&id, hours(offset), &json!({})).unwrap();
        }
    }

    let filter = PersistentClustersFilter::new(PersistentClustersBounds {
        epoch: hours(-100),
        timestamp: hours(0),
    })
    .unwrap();
    assert_eq!(ids(&store.query_persistent_clusters(&filter).unwrap()), vec!["steady"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn sqlite_and_memory_backends_agree(
        checkins in prop::collection::vec((0usize .. 4, -48i64 .. 48), 0 .. 24),
        horizon in -24i64 .. 48,
    ) {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(hours(-72)));
        let sqlite = store_for(&temp.path().join("store.sqlite")).with_clock(clock.clone());
        let memory = InMemoryCheckinStore::new().with_clock(clock);
        for (cluster, offset) in &checkins {
            let id = ClusterId::new(format!("cluster-{cluster}"));
            sqlite.upsert_cluster(&id, &json!({})).unwrap();
            memory.upsert_cluster(&id, &json!({})).unwrap();
            sqlite.check_in(&id, hours(*offset), &json!({})).unwrap();
            memory.check_in(&id, hours(*offset), &json!({})).unwrap();
        }
        let filter = PersistentClustersFilter::new(PersistentClustersBounds {
            epoch: hours(-100),
            timestamp: hours(horizon),
        })
        .unwrap();
        prop_assert_eq!(
            ids(&sqlite.query_persistent_clusters(&filter).unwrap()),
            ids(&memory.query_persistent_clusters(&filter).unwrap())
        );
    }
}

// ============================================================================
// SECTION: Versions
// ============================================================================

#[test]
fn version_round_trip_and_overwrite_keep_one_row() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    let store = store_for(&path);
    let first = store.upsert_version(&submission("api", "stable", "1.0.0", "2024-06-01T00:00:00Z")).unwrap();
    let key = VersionKey::new("api", "stable", "1.0.0");
    assert_eq!(store.get_version(&key).unwrap(), first);

    let second =
        store.upsert_version(&submission("api", "stable", "1.0.0", "2024-06-02T08:30:00+02:00")).unwrap();
    assert_eq!(second.released_at.to_rfc3339(), "2024-06-02T06:30:00Z");
    assert_eq!(store.get_version(&key).unwrap(), second);

    let connection = Connection::open(&path).unwrap();
    let rows: i64 = connection.query_row("SELECT COUNT(*) FROM versions", [], |row| row.get(0)).unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn payloads_read_back_equal_to_what_was_written() {
    let temp = TempDir::new().unwrap();
    let sqlite_audit = Arc::new(MemoryAuditSink::default());
    let memory_audit = Arc::new(MemoryAuditSink::default());
    let store = store_for(&temp.path().join("store.sqlite")).with_audit_sink(sqlite_audit.clone());
    let memory = InMemoryCheckinStore::new().with_audit_sink(memory_audit.clone());
    let payload = json!({"weight": 1.0, "ratio": 0.25, "nodes": 3, "tags": ["a", "b"]});

    let mut version = submission("api", "stable", "1.0.0", "2024-06-01T00:00:00Z");
    version.payload = payload.clone();
    store.upsert_version(&version).unwrap();
    memory.upsert_version(&version).unwrap();
    let key = VersionKey::new("api", "stable", "1.0.0");
    assert_eq!(store.get_version(&key).unwrap().payload, payload);

    let id = ClusterId::new("cluster-a");
    store.upsert_cluster(&id, &payload).unwrap();
    memory.upsert_cluster(&id, &payload).unwrap();
    assert_eq!(store.get_cluster(&id).unwrap().payload, payload);
    assert_eq!(store.get_cluster(&id).unwrap(), memory.get_cluster(&id).unwrap());
    assert_eq!(store.list_checkins(&id).unwrap()[0].payload, payload);

    let details = |audit: &MemoryAuditSink| -> Vec<Option<String>> {
        audit.events().into_iter().map(|event| event.detail).collect()
    };
    let sqlite_details = details(sqlite_audit.as_ref());
    assert_eq!(sqlite_details.len(), 2);
    assert!(sqlite_details.iter().all(|detail| detail.as_deref().is_some_and(|d| d.starts_with("sha256:"))));
    assert_eq!(sqlite_details, details(memory_audit.as_ref()));
}

#[test]
fn invalid_release_timestamp_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    let err = store.upsert_version(&submission("api", "stable", "1.0.0", "2024-06-01")).unwrap_err();
    assert!(matches!(err, StoreError::InvalidTimestamp(_)));
    assert!(err.is_client_error());
    let key = VersionKey::new("api", "stable", "1.0.0");
    assert!(matches!(store.get_version(&key), Err(StoreError::NotFound(_))));
}

#[test]
fn latest_version_orders_by_release_then_insertion() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    store.upsert_version(&submission("api", "stable", "1.2.0", "2024-06-03T00:00:00Z")).unwrap();
    store.upsert_version(&submission("api", "stable", "1.0.0", "2024-06-01T00:00:00Z")).unwrap();
    let latest = store.get_latest_version(&"stable".into(), &"api".into()).unwrap();
    assert_eq!(latest.version.as_str(), "1.2.0");

    store.upsert_version(&submission("api", "stable", "1.2.1", "2024-06-03T00:00:00Z")).unwrap();
    let latest = store.get_latest_version(&"stable".into(), &"api".into()).unwrap();
    assert_eq!(latest.version.as_str(), "1.2.1");

    assert!(matches!(
        store.get_latest_version(&"nightly".into(), &"api".into()),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn latest_versions_batch_matches_single_lookups_across_chunks() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    let components = LATEST_BATCH_CHUNK + 10;
    for index in 0 .. components {
        let component = format!("component-{index:03}");
        store.upsert_version(&submission(&component, "stable", "1.0.0", "2024-06-01T00:00:00Z")).unwrap();
        store.upsert_version(&submission(&component, "stable", "1.1.0", "2024-06-02T00:00:00Z")).unwrap();
    }

    let mut pairs: Vec<TrainKey> = (0 .. components)
        .rev()
        .map(|index| TrainKey::new(format!("component-{index:03}"), "stable"))
        .collect();
    pairs.push(TrainKey::new("component-000", "stable"));
    pairs.push(TrainKey::new("missing", "stable"));

    let latest = store.get_latest_versions(&pairs).unwrap();
    assert_eq!(latest.len(), components);
    assert_eq!(latest[0].component.as_str(), format!("component-{:03}", components - 1));
    for version in &latest {
        assert_eq!(version.version.as_str(), "1.1.0");
        let single = store.get_latest_version(&version.train, &version.component).unwrap();
        assert_eq!(&single, version);
    }
    assert!(store.get_latest_versions(&[]).unwrap().is_empty());
}

// ============================================================================
// SECTION: Integrity and Limits
// ============================================================================

#[test]
fn tampered_payload_hash_is_reported_as_corruption() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    let store = store_for(&path);
    let id = ClusterId::new("cluster-a");
    store.upsert_cluster(&id, &json!({"nodes": 3})).unwrap();

    let connection = Connection::open(&path).unwrap();
    connection
        .execute("UPDATE clusters SET payload_hash = ?1 WHERE cluster_id = ?2", params!["00", "cluster-a"])
        .unwrap();
    assert!(matches!(store.get_cluster(&id), Err(StoreError::Corrupt(_))));
}

#[test]
fn unsupported_schema_version_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    drop(store_for(&path));
    let connection = Connection::open(&path).unwrap();
    connection.execute("UPDATE store_meta SET version = 99", []).unwrap();
    drop(connection);

    let err = SqliteCheckinStore::new(config_for(&path, UpsertStrategy::Atomic)).unwrap_err();
    assert!(matches!(err, SqliteStoreError::VersionMismatch(_)));
    assert!(matches!(StoreError::from(err), StoreError::VersionMismatch(_)));
}

#[test]
fn oversized_payload_is_rejected_without_checkin() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(&temp.path().join("store.sqlite"), UpsertStrategy::Atomic);
    config.max_payload_bytes = 32;
    let store = SqliteCheckinStore::new(config).unwrap();
    let id = ClusterId::new("cluster-a");
    let err = store.upsert_cluster(&id, &json!({"blob": "x".repeat(64)})).unwrap_err();
    assert!(matches!(err, StoreError::TooLarge { max_bytes: 32, .. }));
    assert!(store.list_checkins(&id).unwrap().is_empty());
}

#[test]
fn directory_paths_are_rejected() {
    let temp = TempDir::new().unwrap();
    let err = SqliteCheckinStore::new(config_for(temp.path(), UpsertStrategy::Atomic)).unwrap_err();
    assert!(matches!(err, SqliteStoreError::Invalid(_)));
}

#[test]
fn overlong_path_components_are_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("a".repeat(300));
    let err = SqliteCheckinStore::new(config_for(&path, UpsertStrategy::Atomic)).unwrap_err();
    assert!(matches!(err, SqliteStoreError::Invalid(_)));
}

#[test]
fn pool_size_must_be_positive() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(&temp.path().join("store.sqlite"), UpsertStrategy::Atomic);
    config.pool_size = 0;
    assert!(matches!(SqliteCheckinStore::new(config), Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn readiness_succeeds_on_open_store() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    assert!(CheckinStore::readiness(&store).is_ok());
    assert!(VersionStore::readiness(&store).is_ok());
}
