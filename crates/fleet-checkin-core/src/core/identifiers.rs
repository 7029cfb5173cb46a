// crates/fleet-checkin-core/src/core/identifiers.rs
// ============================================================================
// Module: Fleet Check-in Identifiers
// Description: Opaque natural keys for clusters and released versions.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Clusters are keyed by a caller-supplied [`ClusterId`]. Version records are
//! keyed by the triple ([`ComponentName`], [`Train`], [`VersionName`]), and
//! latest-version lookups by the [`TrainKey`] pair. All identifiers serialize
//! as plain strings and are never normalized.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum identifier length accepted by the stores (bytes).
pub const MAX_IDENTIFIER_LENGTH: usize = 256;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Declares an opaque string identifier newtype.
macro_rules! opaque_string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        ///
        /// # Invariants
        /// - Opaque UTF-8 string; no normalization or validation is applied by this type.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_string_id!(
    /// Caller-supplied cluster identifier (primary key of cluster records).
    ClusterId
);

opaque_string_id!(
    /// Name of a released component.
    ComponentName
);

opaque_string_id!(
    /// Release channel of a component, e.g. `stable` or `beta`.
    Train
);

opaque_string_id!(
    /// Version string of a component release.
    VersionName
);

// ============================================================================
// SECTION: Composite Keys
// ============================================================================

/// A (component, train) pair used for latest-version resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrainKey {
    /// Component name.
    pub component: ComponentName,
    /// Release train.
    pub train: Train,
}

impl TrainKey {
    /// Creates a new (component, train) pair.
    #[must_use]
    pub fn new(component: impl Into<ComponentName>, train: impl Into<Train>) -> Self {
        Self {
            component: component.into(),
            train: train.into(),
        }
    }
}

impl fmt::Display for TrainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.train)
    }
}

/// The unique (component, train, version) triple of a version record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    /// Component name.
    pub component: ComponentName,
    /// Release train.
    pub train: Train,
    /// Version string.
    pub version: VersionName,
}

impl VersionKey {
    /// Creates a new version key.
    #[must_use]
    pub fn new(
        component: impl Into<ComponentName>,
        train: impl Into<Train>,
        version: impl Into<VersionName>,
    ) -> Self {
        Self {
            component: component.into(),
            train: train.into(),
            version: version.into(),
        }
    }

    /// Returns the (component, train) pair of this key.
    #[must_use]
    pub fn train_key(&self) -> TrainKey {
        TrainKey {
            component: self.component.clone(),
            train: self.train.clone(),
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.component, self.train, self.version)
    }
}
