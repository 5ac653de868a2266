use cityflow_config::shared::DuplicatePolicy;
use tracing::{debug, warn};

use crate::bail;
use crate::cache::CacheStore;
use crate::error::{ErrorKind, FlowResult};
use crate::types::{DeferredReference, ObjectLocation, ReferencePatch};

/// Result of recording an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// This call created the mapping; the caller owns transferring the
    /// object.
    First,
    /// The identifier was already mapped; the object must not be transferred
    /// again.
    AlreadyKnown {
        /// The location that stays recorded for the identifier.
        existing: ObjectLocation,
    },
}

impl RecordOutcome {
    /// Whether this call was the first to record the identifier.
    pub fn is_first(&self) -> bool {
        matches!(self, RecordOutcome::First)
    }
}

/// Result of parking a reference to a not-yet-recorded identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferOutcome {
    /// The reference is parked until the target identifier is recorded.
    Deferred,
    /// The target was recorded concurrently; the returned references must be
    /// applied by the caller right away.
    Resolvable {
        /// Location the target identifier resolved to.
        location: ObjectLocation,
        /// All references that were parked against the target, this call's
        /// included.
        references: Vec<DeferredReference>,
    },
}

/// Identifier-to-location mapping with deferred reference resolution.
///
/// Workers record each transferred object under its identifier and resolve
/// the identifiers their references point at. A reference to an identifier
/// that has no location yet is deferred; it is replayed when the target is
/// recorded, either by the recording worker through
/// [`flush_deferred`](CrossReferenceCache::flush_deferred) or by the
/// deferring worker itself when the record landed concurrently.
///
/// All mutation is atomic per identifier, delegated to the backing
/// [`CacheStore`].
#[derive(Debug, Clone)]
pub struct CrossReferenceCache<S> {
    store: S,
    on_duplicate: DuplicatePolicy,
}

impl<S: CacheStore> CrossReferenceCache<S> {
    /// Creates a cache over `store` with the given duplicate handling
    /// policy.
    pub fn new(store: S, on_duplicate: DuplicatePolicy) -> Self {
        Self {
            store,
            on_duplicate,
        }
    }

    /// Prepares the backing store for a run.
    pub async fn prepare(&self) -> FlowResult<()> {
        self.store.prepare().await
    }

    /// Records `identifier` at `location`.
    ///
    /// Recording the same location twice is idempotent. A conflicting
    /// location is handled per policy: first-write-wins keeps the original
    /// mapping and reports [`RecordOutcome::AlreadyKnown`], reject fails
    /// with [`ErrorKind::DuplicateIdentifier`].
    pub async fn record(
        &self,
        identifier: &str,
        location: ObjectLocation,
    ) -> FlowResult<RecordOutcome> {
        let Some(existing) = self.store.put_location(identifier, location).await? else {
            return Ok(RecordOutcome::First);
        };

        if existing != location {
            match self.on_duplicate {
                DuplicatePolicy::FirstWins => {
                    warn!(
                        identifier,
                        kept = %existing,
                        dropped = %location,
                        "duplicate identifier, keeping first recorded location"
                    );
                }
                DuplicatePolicy::Reject => {
                    bail!(
                        ErrorKind::DuplicateIdentifier,
                        "identifier is already recorded at a different location",
                        format!("identifier {identifier} maps to {existing}, rejected {location}")
                    );
                }
            }
        }

        Ok(RecordOutcome::AlreadyKnown { existing })
    }

    /// Returns the location recorded for `identifier`, if any.
    pub async fn resolve(&self, identifier: &str) -> FlowResult<Option<ObjectLocation>> {
        self.store.get_location(identifier).await
    }

    /// Parks a reference from `from` to the identifier `target`.
    ///
    /// Callers invoke this after [`resolve`](CrossReferenceCache::resolve)
    /// returned nothing. The target may still get recorded between that
    /// lookup and the park, so the mapping is rechecked afterwards; whoever
    /// observes both the mapping and the parked references takes them and
    /// applies them.
    pub async fn defer_reference(
        &self,
        from: ObjectLocation,
        target: &str,
        patch: ReferencePatch,
    ) -> FlowResult<DeferOutcome> {
        self.store
            .push_deferred(DeferredReference {
                from,
                target: target.to_string(),
                patch,
            })
            .await?;

        if let Some(location) = self.store.get_location(target).await? {
            let references = self.store.take_deferred(target).await?;
            if !references.is_empty() {
                debug!(
                    target,
                    references = references.len(),
                    "target recorded concurrently, resolving parked references"
                );
                return Ok(DeferOutcome::Resolvable {
                    location,
                    references,
                });
            }
        }

        Ok(DeferOutcome::Deferred)
    }

    /// Takes all references parked against `identifier`.
    ///
    /// Called immediately after a [`record`](CrossReferenceCache::record)
    /// that returned [`RecordOutcome::First`]; the caller applies each
    /// returned reference against the newly recorded location.
    pub async fn flush_deferred(&self, identifier: &str) -> FlowResult<Vec<DeferredReference>> {
        self.store.take_deferred(identifier).await
    }

    /// Removes and returns every reference that never found its target.
    ///
    /// Called once at the end of a transfer; the controller reports the
    /// result as a completion warning.
    pub async fn unresolved_at_end(&self) -> FlowResult<Vec<DeferredReference>> {
        self.store.drain_deferred().await
    }

    /// Releases the backing storage, regardless of transfer outcome.
    pub async fn teardown(&self) -> FlowResult<()> {
        self.store.teardown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::types::{FeatureKey, FeatureKind};
    use std::sync::Arc;

    fn location(key: i64) -> ObjectLocation {
        ObjectLocation {
            key: FeatureKey(key),
            kind: FeatureKind::Building,
        }
    }

    fn patch() -> ReferencePatch {
        ReferencePatch {
            attribute: "generalizes_to".to_string(),
        }
    }

    fn cache(policy: DuplicatePolicy) -> CrossReferenceCache<MemoryCacheStore> {
        CrossReferenceCache::new(MemoryCacheStore::new(), policy)
    }

    #[tokio::test]
    async fn records_and_resolves_identifiers() {
        let cache = cache(DuplicatePolicy::FirstWins);

        let outcome = cache.record("b-1", location(10)).await.unwrap();

        assert!(outcome.is_first());
        assert_eq!(cache.resolve("b-1").await.unwrap(), Some(location(10)));
        assert_eq!(cache.resolve("b-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn recording_the_same_location_twice_is_idempotent() {
        let cache = cache(DuplicatePolicy::Reject);

        cache.record("b-1", location(10)).await.unwrap();
        let outcome = cache.record("b-1", location(10)).await.unwrap();

        assert_eq!(
            outcome,
            RecordOutcome::AlreadyKnown {
                existing: location(10)
            }
        );
    }

    #[tokio::test]
    async fn first_wins_keeps_the_initial_location() {
        let cache = cache(DuplicatePolicy::FirstWins);

        cache.record("b-1", location(10)).await.unwrap();
        let outcome = cache.record("b-1", location(20)).await.unwrap();

        assert_eq!(
            outcome,
            RecordOutcome::AlreadyKnown {
                existing: location(10)
            }
        );
        assert_eq!(cache.resolve("b-1").await.unwrap(), Some(location(10)));
    }

    #[tokio::test]
    async fn reject_policy_fails_on_conflicting_record() {
        let cache = cache(DuplicatePolicy::Reject);

        cache.record("b-1", location(10)).await.unwrap();
        let error = cache.record("b-1", location(20)).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::DuplicateIdentifier);
        assert_eq!(cache.resolve("b-1").await.unwrap(), Some(location(10)));
    }

    #[tokio::test]
    async fn deferred_reference_waits_until_the_target_is_recorded() {
        let cache = cache(DuplicatePolicy::FirstWins);

        let outcome = cache
            .defer_reference(location(1), "b-9", patch())
            .await
            .unwrap();
        assert_eq!(outcome, DeferOutcome::Deferred);

        cache.record("b-9", location(9)).await.unwrap();
        let flushed = cache.flush_deferred("b-9").await.unwrap();

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].from, location(1));
        assert_eq!(flushed[0].target, "b-9");
        assert!(cache.unresolved_at_end().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deferring_after_the_record_resolves_immediately() {
        let cache = cache(DuplicatePolicy::FirstWins);

        cache.record("b-9", location(9)).await.unwrap();
        let outcome = cache
            .defer_reference(location(1), "b-9", patch())
            .await
            .unwrap();

        match outcome {
            DeferOutcome::Resolvable {
                location: resolved,
                references,
            } => {
                assert_eq!(resolved, location(9));
                assert_eq!(references.len(), 1);
            }
            DeferOutcome::Deferred => panic!("reference must resolve against the recorded target"),
        }
        assert!(cache.unresolved_at_end().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unresolved_at_end_returns_only_unmatched_references() {
        let cache = cache(DuplicatePolicy::FirstWins);

        cache
            .defer_reference(location(1), "missing", patch())
            .await
            .unwrap();
        cache
            .defer_reference(location(2), "b-9", patch())
            .await
            .unwrap();
        cache.record("b-9", location(9)).await.unwrap();
        cache.flush_deferred("b-9").await.unwrap();

        let unresolved = cache.unresolved_at_end().await.unwrap();

        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].target, "missing");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_records_elect_exactly_one_first_writer() {
        let cache = Arc::new(cache(DuplicatePolicy::FirstWins));

        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.record("b-1", location(worker)).await.unwrap()
            }));
        }

        let mut first_writers = 0;
        for handle in handles {
            if handle.await.unwrap().is_first() {
                first_writers += 1;
            }
        }

        assert_eq!(first_writers, 1);
    }
}
