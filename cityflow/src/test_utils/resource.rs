use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::FlowResult;
use crate::transfer::ResourceFactory;

/// Resource factory handing out unit resources.
///
/// Counts creations and disposals, so a test can assert how many workers a
/// run actually materialized and that every resource was released. Clones
/// share the counters.
#[derive(Clone, Default)]
pub struct UnitResourceFactory {
    created: Arc<AtomicU64>,
    disposed: Arc<AtomicU64>,
}

impl UnitResourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    /// Resources disposed so far.
    pub fn disposed(&self) -> u64 {
        self.disposed.load(Ordering::Acquire)
    }
}

impl ResourceFactory for UnitResourceFactory {
    type Resource = ();

    async fn create_resource(&self, _worker_id: u64) -> FlowResult<()> {
        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn dispose(&self, _resource: ()) {
        self.disposed.fetch_add(1, Ordering::AcqRel);
    }
}
