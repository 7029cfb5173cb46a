// crates/fleet-checkin-core/src/runtime/store.rs
// ============================================================================
// Module: Fleet Check-in In-Memory Store
// Description: In-memory check-in ledger and version catalog.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! [`InMemoryCheckinStore`] implements both store traits behind one mutex, so
//! every operation is trivially atomic. Filter queries evaluate the shared
//! [`crate::core::FilterPredicate`] against per-cluster aggregates, and
//! latest-version lookups use [`crate::core::resolve_latest`], so results
//! match the durable backend exactly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde_json::Value;

use crate::core::CheckinRecord;
use crate::core::CheckinStats;
use crate::core::ClusterId;
use crate::core::ClusterRecord;
use crate::core::ComponentName;
use crate::core::ComponentVersion;
use crate::core::PayloadDigest;
use crate::core::SequencedVersion;
use crate::core::StoreAuditEvent;
use crate::core::StoreOperation;
use crate::core::TimeFilter;
use crate::core::Timestamp;
use crate::core::ToPredicate;
use crate::core::Train;
use crate::core::TrainKey;
use crate::core::UpsertOutcome;
use crate::core::VersionKey;
use crate::core::VersionSubmission;
use crate::core::encode_payload;
use crate::core::resolve_latest;
use crate::interfaces::CheckinStore;
use crate::interfaces::Clock;
use crate::interfaces::DEFAULT_MAX_PAYLOAD_BYTES;
use crate::interfaces::StoreAuditSink;
use crate::interfaces::StoreError;
use crate::interfaces::VersionStore;
use crate::interfaces::validate_identifier;
use crate::interfaces::validate_payload_size;
use crate::runtime::audit::NoopAuditSink;
use crate::runtime::clock::SystemClock;

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable state guarded by the store mutex.
#[derive(Debug, Default)]
struct MemoryState {
    /// Cluster payloads keyed by cluster id.
    clusters: BTreeMap<ClusterId, Value>,
    /// Check-ins in insertion order.
    checkins: Vec<CheckinRecord>,
    /// Versions keyed by their unique triple.
    versions: BTreeMap<VersionKey, SequencedVersion>,
    /// Next version insertion sequence.
    next_sequence: i64,
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory check-in ledger and version catalog for tests and local use.
#[derive(Clone)]
pub struct InMemoryCheckinStore {
    /// Store state protected by a mutex.
    state: Arc<Mutex<MemoryState>>,
    /// Source of the upsert check-in instant.
    clock: Arc<dyn Clock>,
    /// Audit sink for writes.
    audit: Arc<dyn StoreAuditSink>,
    /// Maximum encoded payload size in bytes.
    max_payload_bytes: usize,
}

impl fmt::Debug for InMemoryCheckinStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCheckinStore")
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryCheckinStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCheckinStore {
    /// Creates an empty store using the wall clock and no audit output.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock: Arc::new(SystemClock),
            audit: Arc::new(NoopAuditSink),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn StoreAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Sets the payload size limit.
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    /// Locks the store state.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Store("check-in store mutex poisoned".to_string()))
    }

    /// Enforces the payload size limit on the stored encoding and returns the
    /// canonical digest for auditing.
    fn check_payload(&self, payload: &Value) -> Result<PayloadDigest, StoreError> {
        let encoded = encode_payload(payload).map_err(|err| StoreError::Invalid(err.to_string()))?;
        validate_payload_size(encoded.bytes.len(), self.max_payload_bytes)?;
        Ok(encoded.canonical)
    }
}

// ============================================================================
// SECTION: Check-in Store
// ============================================================================

impl CheckinStore for InMemoryCheckinStore {
    fn upsert_cluster(&self, cluster_id: &ClusterId, payload: &Value) -> Result<ClusterRecord, StoreError> {
        validate_identifier("cluster_id", cluster_id.as_str())?;
        let digest = self.check_payload(payload)?;
        let created_at = self.clock.now();
        let mut state = self.lock()?;
        state.checkins.push(CheckinRecord {
            cluster_id: cluster_id.clone(),
            created_at,
            payload: payload.clone(),
        });
        let outcome = match state.clusters.insert(cluster_id.clone(), payload.clone()) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };
        drop(state);
        self.audit.record(
            &StoreAuditEvent::write(StoreOperation::UpsertCluster, cluster_id.as_str(), outcome.as_str())
                .with_detail(digest.to_string()),
        );
        Ok(ClusterRecord {
            cluster_id: cluster_id.clone(),
            payload: payload.clone(),
        })
    }

    fn check_in(
        &self,
        cluster_id: &ClusterId,
        created_at: Timestamp,
        payload: &Value,
    ) -> Result<CheckinRecord, StoreError> {
        validate_identifier("cluster_id", cluster_id.as_str())?;
        let digest = self.check_payload(payload)?;
        let record = CheckinRecord {
            cluster_id: cluster_id.clone(),
            created_at,
            payload: payload.clone(),
        };
        self.lock()?.checkins.push(record.clone());
        self.audit.record(
            &StoreAuditEvent::write(StoreOperation::CheckIn, cluster_id.as_str(), "created")
                .with_detail(digest.to_string()),
        );
        Ok(record)
    }

    fn get_cluster(&self, cluster_id: &ClusterId) -> Result<ClusterRecord, StoreError> {
        let state = self.lock()?;
        let payload = state
            .clusters
            .get(cluster_id)
            .ok_or_else(|| StoreError::NotFound(format!("cluster {cluster_id}")))?;
        Ok(ClusterRecord {
            cluster_id: cluster_id.clone(),
            payload: payload.clone(),
        })
    }

    fn list_checkins(&self, cluster_id: &ClusterId) -> Result<Vec<CheckinRecord>, StoreError> {
        let state = self.lock()?;
        let mut records: Vec<CheckinRecord> =
            state.checkins.iter().filter(|record| &record.cluster_id == cluster_id).cloned().collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    fn query_clusters(&self, filter: &TimeFilter) -> Result<Vec<ClusterRecord>, StoreError> {
        let predicate = filter.predicate();
        let state = self.lock()?;
        let mut instants: BTreeMap<&ClusterId, Vec<Timestamp>> = BTreeMap::new();
        for record in &state.checkins {
            instants.entry(&record.cluster_id).or_default().push(record.created_at);
        }
        let matched = state
            .clusters
            .iter()
            .filter(|(cluster_id, _)| {
                let stats = instants
                    .get(cluster_id)
                    .and_then(|values| CheckinStats::from_instants(values.iter().copied()));
                predicate.matches(stats.as_ref())
            })
            .map(|(cluster_id, payload)| ClusterRecord {
                cluster_id: cluster_id.clone(),
                payload: payload.clone(),
            })
            .collect();
        Ok(matched)
    }
}

// ============================================================================
// SECTION: Version Store
// ============================================================================

impl VersionStore for InMemoryCheckinStore {
    fn upsert_version(&self, submission: &VersionSubmission) -> Result<ComponentVersion, StoreError> {
        let version = submission.parse()?;
        validate_identifier("component", version.component.as_str())?;
        validate_identifier("train", version.train.as_str())?;
        validate_identifier("version", version.version.as_str())?;
        let digest = self.check_payload(&version.payload)?;
        let key = version.key();
        let mut state = self.lock()?;
        let outcome = if let Some(existing) = state.versions.get_mut(&key) {
            existing.version = version.clone();
            UpsertOutcome::Updated
        } else {
            let sequence = state.next_sequence;
            state.next_sequence = sequence.saturating_add(1);
            state.versions.insert(
                key.clone(),
                SequencedVersion {
                    sequence,
                    version: version.clone(),
                },
            );
            UpsertOutcome::Created
        };
        drop(state);
        self.audit.record(
            &StoreAuditEvent::write(StoreOperation::UpsertVersion, key.to_string(), outcome.as_str())
                .with_detail(digest.to_string()),
        );
        Ok(version)
    }

    fn get_version(&self, key: &VersionKey) -> Result<ComponentVersion, StoreError> {
        self.lock()?
            .versions
            .get(key)
            .map(|entry| entry.version.clone())
            .ok_or_else(|| StoreError::NotFound(format!("version {key}")))
    }

    fn get_latest_version(
        &self,
        train: &Train,
        component: &ComponentName,
    ) -> Result<ComponentVersion, StoreError> {
        let pair = TrainKey {
            component: component.clone(),
            train: train.clone(),
        };
        self.get_latest_versions(std::slice::from_ref(&pair))?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("latest version of {pair}")))
    }

    fn get_latest_versions(&self, pairs: &[TrainKey]) -> Result<Vec<ComponentVersion>, StoreError> {
        let state = self.lock()?;
        Ok(resolve_latest(pairs, state.versions.values().cloned()))
    }
}
