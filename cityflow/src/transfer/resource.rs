use std::future::Future;

use crate::error::FlowResult;

/// Creates the store resource each worker exclusively owns.
///
/// The pool invokes the factory once per worker slot, at start for the
/// prestarted workers and again whenever the sizing monitor grows the pool.
/// The resource is typically one store connection; it lives for the
/// worker's whole lifetime and is never shared across workers.
///
/// A creation failure costs the pool one worker slot; pool start fails only
/// when no worker at all could be created.
pub trait ResourceFactory: Send + Sync + 'static {
    /// Resource type owned by one worker.
    type Resource: Send + 'static;

    /// Opens a new resource for the worker with `worker_id`.
    fn create_resource(
        &self,
        worker_id: u64,
    ) -> impl Future<Output = FlowResult<Self::Resource>> + Send;

    /// Releases `resource` when its worker retires.
    ///
    /// The default implementation drops the resource. Override it when the
    /// resource needs an explicit close handshake.
    fn dispose(&self, resource: Self::Resource) -> impl Future<Output = ()> + Send {
        async move {
            drop(resource);
        }
    }
}
