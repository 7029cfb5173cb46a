// crates/fleet-checkin-core/src/core/hashing.rs
// ============================================================================
// Module: Fleet Check-in Payload Hashing
// Description: Payload encoding and integrity digests.
// Purpose: Store opaque payloads verbatim and detect corruption on read.
// Dependencies: serde_jcs, serde_json, sha2
// ============================================================================

//! ## Overview
//! Payloads are opaque to storage. They are stored as the caller's JSON
//! serialization so reads return exactly what was written, and every stored
//! blob carries a SHA-256 digest over those bytes that readers verify before
//! decoding. A second digest over the RFC 8785 (JCS) canonical form
//! identifies a payload independent of key order or number formatting and is
//! what audit events report.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported payload digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    /// Returns the stable storage label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Parses a storage label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// Default digest algorithm for stored payloads.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Digest
// ============================================================================

/// Digest of an encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDigest {
    /// Digest algorithm.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest.
    pub value: String,
}

impl fmt::Display for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.label(), self.value)
    }
}

/// A payload encoded for storage with its digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// Stored JSON bytes.
    pub bytes: Vec<u8>,
    /// Digest over `bytes`, verified on read.
    pub digest: PayloadDigest,
    /// Digest over the canonical (JCS) form.
    pub canonical: PayloadDigest,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Payload encoding and verification errors.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Serialization failed.
    #[error("failed to encode payload: {0}")]
    Encode(String),
    /// Canonical encoding failed.
    #[error("failed to canonicalize payload: {0}")]
    Canonicalization(String),
    /// Stored bytes do not match their digest.
    #[error("payload digest mismatch")]
    DigestMismatch,
    /// Stored digest algorithm is unknown.
    #[error("unsupported payload hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Stored bytes are not valid JSON.
    #[error("payload is not valid json: {0}")]
    Decode(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Encodes a payload for storage and digests it.
///
/// # Errors
///
/// Returns [`PayloadError::Encode`] or [`PayloadError::Canonicalization`]
/// when either encoding fails.
pub fn encode_payload(payload: &Value) -> Result<EncodedPayload, PayloadError> {
    let bytes = serde_json::to_vec(payload).map_err(|err| PayloadError::Encode(err.to_string()))?;
    let canonical_bytes =
        serde_jcs::to_vec(payload).map_err(|err| PayloadError::Canonicalization(err.to_string()))?;
    Ok(EncodedPayload {
        digest: digest_bytes(DEFAULT_HASH_ALGORITHM, &bytes),
        canonical: digest_bytes(DEFAULT_HASH_ALGORITHM, &canonical_bytes),
        bytes,
    })
}

/// Verifies stored bytes against a stored digest and decodes them.
///
/// # Errors
///
/// Returns [`PayloadError`] when the algorithm is unknown, the digest does not
/// match, or the bytes are not JSON.
pub fn decode_payload(bytes: &[u8], algorithm: &str, digest: &str) -> Result<Value, PayloadError> {
    let algorithm = HashAlgorithm::from_label(algorithm)
        .ok_or_else(|| PayloadError::UnsupportedAlgorithm(algorithm.to_string()))?;
    if digest_bytes(algorithm, bytes).value != digest {
        return Err(PayloadError::DigestMismatch);
    }
    serde_json::from_slice(bytes).map_err(|err| PayloadError::Decode(err.to_string()))
}

/// Digests raw bytes.
#[must_use]
pub fn digest_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> PayloadDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            PayloadDigest {
                algorithm,
                value: hex_encode(&hasher.finalize()),
            }
        }
    }
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    /// Lowercase hex digits.
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================
