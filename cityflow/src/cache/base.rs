use std::future::Future;

use crate::error::FlowResult;
use crate::types::{DeferredReference, ObjectLocation};

/// Trait for the backing storage of the cross-reference cache.
///
/// [`CacheStore`] implementations hold the identifier-to-location mapping and
/// the deferred references parked against identifiers that have not been
/// recorded yet.
///
/// Implementations must be safe for concurrent access from all workers, and
/// `put_location` / `take_deferred` must be atomic per identifier: two
/// workers racing on the same identifier must never both observe themselves
/// as the first writer, and a deferred reference must never be returned from
/// `take_deferred` twice.
pub trait CacheStore {
    /// Prepares the backing storage for a run.
    ///
    /// Called once by the controller before any worker starts.
    fn prepare(&self) -> impl Future<Output = FlowResult<()>> + Send;

    /// Atomically maps `identifier` to `location` unless a mapping already
    /// exists.
    ///
    /// Returns the previously recorded location when the identifier was
    /// already mapped, [`None`] when this call created the mapping.
    fn put_location(
        &self,
        identifier: &str,
        location: ObjectLocation,
    ) -> impl Future<Output = FlowResult<Option<ObjectLocation>>> + Send;

    /// Returns the location recorded for `identifier`, if any.
    fn get_location(
        &self,
        identifier: &str,
    ) -> impl Future<Output = FlowResult<Option<ObjectLocation>>> + Send;

    /// Parks a reference whose target identifier has no recorded location
    /// yet.
    fn push_deferred(
        &self,
        reference: DeferredReference,
    ) -> impl Future<Output = FlowResult<()>> + Send;

    /// Atomically removes and returns all deferred references waiting on
    /// `identifier`.
    fn take_deferred(
        &self,
        identifier: &str,
    ) -> impl Future<Output = FlowResult<Vec<DeferredReference>>> + Send;

    /// Removes and returns every deferred reference still parked, across all
    /// identifiers.
    fn drain_deferred(&self) -> impl Future<Output = FlowResult<Vec<DeferredReference>>> + Send;

    /// Releases all backing resources of the run.
    ///
    /// Called by the controller on every outcome, including aborts. Spill
    /// files and scratch tables must not survive the run.
    fn teardown(&self) -> impl Future<Output = FlowResult<()>> + Send;
}
