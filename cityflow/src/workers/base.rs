use std::future::Future;

use crate::error::FlowResult;

/// A worker consuming items from the pool's shared queue.
///
/// One instance runs per pool slot in its own task and owns whatever
/// external resource it needs (typically one store connection) for its
/// entire lifetime. Resources are never shared across workers.
pub trait PoolWorker: Send + 'static {
    /// Type of work item this worker consumes.
    type Item: Send + 'static;

    /// Processes one work item to completion.
    ///
    /// Item-level failures must be recovered inside the implementation
    /// (logged and counted, the pipeline continues). An `Err` return means
    /// the worker itself is in trouble; the pool classifies it through
    /// [`classify_failure`](crate::workers::classify_failure) and either
    /// retires the worker or aborts the run.
    fn process(&mut self, item: Self::Item) -> impl Future<Output = FlowResult<()>> + Send;

    /// Called once when the worker leaves the pool, in the worker's own
    /// task, for any exit reason.
    ///
    /// Implementations release their owned resource and publish final
    /// counters here.
    fn retire(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async move {
            drop(self);
        }
    }
}

/// Creates one [`PoolWorker`] per pool slot.
///
/// The factory is invoked at pool start for the prestarted workers and
/// again whenever the sizing monitor grows the pool. A factory failure is
/// not fatal unless no worker at all could be created.
pub trait WorkerFactory: Send + Sync + 'static {
    /// Worker type produced by this factory.
    type Worker: PoolWorker;

    /// Creates a new worker together with its owned resource.
    fn create_worker(
        &self,
        worker_id: u64,
    ) -> impl Future<Output = FlowResult<Self::Worker>> + Send;
}
