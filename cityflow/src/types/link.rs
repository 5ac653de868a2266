use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{FeatureKey, FeatureKind};

/// Location of a transferred feature in the target store.
///
/// [`ObjectLocation`] is the value side of the cross-reference mapping:
/// once a feature with a given identifier has been processed, any later
/// reference to that identifier resolves to its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Primary key the feature ended up under.
    pub key: FeatureKey,
    /// Category of the feature.
    pub kind: FeatureKind,
}

impl ObjectLocation {
    pub fn new(key: FeatureKey, kind: FeatureKind) -> Self {
        Self { key, kind }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.key)
    }
}

/// Patch-back instruction stored with a deferred reference.
///
/// Names the attribute of the referencing feature that must be rewritten
/// once the target becomes available. The attribute is interpreted by the
/// codec that processed the referencing feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePatch {
    /// Attribute of the referencing feature holding the reference.
    pub attribute: String,
}

impl ReferencePatch {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

/// A cross-reference whose target had not been processed at resolution time.
///
/// [`DeferredReference`]s are parked in the cache keyed by target identifier
/// and replayed by [`flush_deferred`](crate::cache::CrossReferenceCache::flush_deferred)
/// once the target is recorded. References still parked at transfer end are
/// reported as a completion warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredReference {
    /// Location of the feature holding the unresolved reference.
    pub from: ObjectLocation,
    /// Identifier of the feature being referenced.
    pub target: String,
    /// How to rewrite the reference once the target is available.
    pub patch: ReferencePatch,
}

impl DeferredReference {
    pub fn new(from: ObjectLocation, target: impl Into<String>, patch: ReferencePatch) -> Self {
        Self {
            from,
            target: target.into(),
            patch,
        }
    }
}
