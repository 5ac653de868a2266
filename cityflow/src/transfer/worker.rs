use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheStore, CrossReferenceCache, DeferOutcome};
use crate::error::FlowResult;
use crate::events::{CounterEvent, EventBus, FlowEvent, ProgressEvent};
#[cfg(feature = "failpoints")]
use crate::failpoints::{WORKER_BEFORE_PROCESS, flow_fail_point};
use crate::transfer::codec::{CodecRegistry, ItemCodec, OutgoingReference};
use crate::transfer::resource::ResourceFactory;
use crate::types::{DeferredReference, ObjectLocation, WorkItem};
use crate::workers::{FailureAction, PoolWorker, WorkerFactory, classify_failure};

/// Creates one [`TransferWorker`] per pool slot, each with its own store
/// resource.
pub struct TransferWorkerFactory<S, RF: ResourceFactory> {
    resources: Arc<RF>,
    codecs: Arc<CodecRegistry<RF::Resource>>,
    cache: CrossReferenceCache<S>,
    bus: Arc<EventBus>,
}

impl<S, RF> TransferWorkerFactory<S, RF>
where
    S: CacheStore + Clone + Send + Sync + 'static,
    RF: ResourceFactory,
{
    pub fn new(
        resources: Arc<RF>,
        codecs: Arc<CodecRegistry<RF::Resource>>,
        cache: CrossReferenceCache<S>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            resources,
            codecs,
            cache,
            bus,
        }
    }
}

impl<S, RF> WorkerFactory for TransferWorkerFactory<S, RF>
where
    S: CacheStore + Clone + Send + Sync + 'static,
    RF: ResourceFactory,
{
    type Worker = TransferWorker<S, RF>;

    async fn create_worker(&self, worker_id: u64) -> FlowResult<TransferWorker<S, RF>> {
        let resource = self.resources.create_resource(worker_id).await?;
        debug!(worker_id, "created transfer worker");

        Ok(TransferWorker {
            worker_id,
            resource,
            resources: self.resources.clone(),
            codecs: self.codecs.clone(),
            cache: self.cache.clone(),
            bus: self.bus.clone(),
            counters: CounterEvent::default(),
        })
    }
}

/// One pool worker transferring items through its own store resource.
///
/// The worker drives the full per-item flow: duplicate check, codec
/// dispatch, identifier recording, and reference resolution against the
/// shared cross-reference cache. Item-scoped failures are recovered here
/// (logged and counted); only resource and fatal failures reach the pool.
///
/// Counters are worker-local and published as one [`CounterEvent`] at
/// retirement, a [`ProgressEvent`] goes out after every consumed item.
pub struct TransferWorker<S, RF: ResourceFactory> {
    worker_id: u64,
    resource: RF::Resource,
    resources: Arc<RF>,
    codecs: Arc<CodecRegistry<RF::Resource>>,
    cache: CrossReferenceCache<S>,
    bus: Arc<EventBus>,
    counters: CounterEvent,
}

/// How one item left the worker.
enum ItemOutcome {
    Processed,
    SkippedDuplicate,
}

impl<S, RF> TransferWorker<S, RF>
where
    S: CacheStore + Clone + Send + Sync + 'static,
    RF: ResourceFactory,
{
    async fn transfer_item(&mut self, item: &WorkItem) -> FlowResult<ItemOutcome> {
        #[cfg(feature = "failpoints")]
        flow_fail_point(WORKER_BEFORE_PROCESS)?;

        if item.check_duplicates && let Some(identifier) = &item.identifier {
            if self.cache.resolve(identifier).await?.is_some() {
                debug!(
                    worker_id = self.worker_id,
                    identifier = %identifier,
                    "identifier already transferred, skipping item"
                );
                return Ok(ItemOutcome::SkippedDuplicate);
            }
        }

        let codec = self.codecs.get(item.kind)?;
        let output = codec.transfer(&mut self.resource, item).await?;

        if let Some(identifier) = &item.identifier {
            let outcome = self.cache.record(identifier, output.location).await?;
            if outcome.is_first() {
                // Whoever records an identifier owns replaying the
                // references parked against it.
                let parked = self.cache.flush_deferred(identifier).await?;
                for reference in &parked {
                    codec
                        .patch_reference(&mut self.resource, reference, output.location)
                        .await?;
                }
            }
        }

        for reference in output.references {
            self.link(codec.as_ref(), output.location, reference).await?;
        }

        Ok(ItemOutcome::Processed)
    }

    /// Resolves one outgoing reference now or parks it for later.
    async fn link(
        &mut self,
        codec: &dyn ItemCodec<RF::Resource>,
        from: ObjectLocation,
        reference: OutgoingReference,
    ) -> FlowResult<()> {
        let OutgoingReference { target, patch } = reference;

        if let Some(location) = self.cache.resolve(&target).await? {
            let reference = DeferredReference::new(from, target, patch);
            return codec
                .patch_reference(&mut self.resource, &reference, location)
                .await;
        }

        match self.cache.defer_reference(from, &target, patch).await? {
            DeferOutcome::Deferred => Ok(()),
            DeferOutcome::Resolvable {
                location,
                references,
            } => {
                // The target landed between the lookup and the park; this
                // call took the parked references and owns applying them.
                for reference in &references {
                    codec
                        .patch_reference(&mut self.resource, reference, location)
                        .await?;
                }
                Ok(())
            }
        }
    }
}

impl<S, RF> PoolWorker for TransferWorker<S, RF>
where
    S: CacheStore + Clone + Send + Sync + 'static,
    RF: ResourceFactory,
{
    type Item = WorkItem;

    async fn process(&mut self, item: WorkItem) -> FlowResult<()> {
        match self.transfer_item(&item).await {
            Ok(ItemOutcome::Processed) => {
                *self.counters.processed.entry(item.kind).or_default() += 1;
            }
            Ok(ItemOutcome::SkippedDuplicate) => {
                self.counters.skipped_duplicates += 1;
            }
            Err(error) if classify_failure(&error) == FailureAction::SkipItem => {
                warn!(
                    worker_id = self.worker_id,
                    item = %item.key,
                    error = %error,
                    "item failed, skipping"
                );
                self.counters.failed += 1;
            }
            Err(error) => return Err(error),
        }

        self.bus
            .publish(FlowEvent::Progress(ProgressEvent { completed: 1 }));

        Ok(())
    }

    async fn retire(self) {
        let TransferWorker {
            worker_id,
            resource,
            resources,
            bus,
            counters,
            ..
        } = self;

        bus.publish(FlowEvent::ObjectCounter(counters));
        resources.dispose(resource).await;
        debug!(worker_id, "transfer worker retired");
    }
}
