// crates/fleet-checkin-core/src/core/mod.rs
// ============================================================================
// Module: Fleet Check-in Core Types
// Description: Canonical time, identifier, record, and filter types.
// Purpose: Provide stable, serializable types shared by every store backend.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Core types describe clusters, their check-ins, released component
//! versions, and the validated time-window filters that select clusters.
//! Backends depend on these types and never re-derive their rules.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod filter;
pub mod hashing;
pub mod identifiers;
pub mod latest;
pub mod query;
pub mod records;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::StoreAuditEvent;
pub use audit::StoreOperation;
pub use filter::ClusterAgeBounds;
pub use filter::ClusterAgeFilter;
pub use filter::ClusterCheckinsBounds;
pub use filter::ClusterCheckinsFilter;
pub use filter::FilterBound;
pub use filter::FilterError;
pub use filter::FilterInvariant;
pub use filter::FilterKey;
pub use filter::ImpossibleFilter;
pub use filter::PERSISTENT_LOOKBACK;
pub use filter::ParamSource;
pub use filter::PersistentClustersBounds;
pub use filter::PersistentClustersFilter;
pub use filter::TimeFilter;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::EncodedPayload;
pub use hashing::HashAlgorithm;
pub use hashing::PayloadDigest;
pub use hashing::PayloadError;
pub use hashing::decode_payload;
pub use hashing::encode_payload;
pub use identifiers::ClusterId;
pub use identifiers::ComponentName;
pub use identifiers::MAX_IDENTIFIER_LENGTH;
pub use identifiers::Train;
pub use identifiers::TrainKey;
pub use identifiers::VersionKey;
pub use identifiers::VersionName;
pub use latest::SequencedVersion;
pub use latest::distinct_pairs;
pub use latest::resolve_latest;
pub use query::Aggregate;
pub use query::AggregateTerm;
pub use query::CheckinStats;
pub use query::Comparison;
pub use query::FilterPredicate;
pub use query::Operand;
pub use query::ToPredicate;
pub use records::CheckinRecord;
pub use records::ClusterRecord;
pub use records::ComponentVersion;
pub use records::UpsertOutcome;
pub use records::VersionSubmission;
pub use time::InvalidTimestamp;
pub use time::Timestamp;
pub use time::TimestampError;
pub use time::parse_field;
