use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{ErrorKind, FlowResult};
use crate::flow_error;
use crate::transfer::{ItemCodec, OutgoingReference, TransferOutput};
use crate::types::{DeferredReference, FeatureKey, ObjectLocation, WorkItem};

/// One reference rewrite performed through [`RecordingCodec`].
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPatch {
    /// The deferred reference that was replayed.
    pub reference: DeferredReference,
    /// Location the reference now points at.
    pub target: ObjectLocation,
}

/// Scripted in-memory item codec.
///
/// Every transferred item lands at `ObjectLocation::new(item.key, item.kind)`
/// and is recorded for later assertions, as is every patched reference.
/// Outgoing references and failures are declared per feature key; clones
/// share the recorded state, so a test can keep a handle while the codec is
/// consumed by a registry.
#[derive(Clone, Default)]
pub struct RecordingCodec {
    references: HashMap<FeatureKey, Vec<OutgoingReference>>,
    failures: HashMap<FeatureKey, ErrorKind>,
    transfers: Arc<Mutex<Vec<WorkItem>>>,
    patches: Arc<Mutex<Vec<AppliedPatch>>>,
}

impl RecordingCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an outgoing reference emitted when `key` is transferred.
    pub fn with_reference(mut self, key: FeatureKey, reference: OutgoingReference) -> Self {
        self.references.entry(key).or_default().push(reference);
        self
    }

    /// Makes the transfer of `key` fail with `kind`.
    pub fn failing(mut self, key: FeatureKey, kind: ErrorKind) -> Self {
        self.failures.insert(key, kind);
        self
    }

    /// Items transferred so far, in processing order.
    pub fn transfers(&self) -> Vec<WorkItem> {
        self.transfers.lock().unwrap().clone()
    }

    /// Reference rewrites performed so far, in processing order.
    pub fn patches(&self) -> Vec<AppliedPatch> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl<R: Send> ItemCodec<R> for RecordingCodec {
    async fn transfer(&self, _resource: &mut R, item: &WorkItem) -> FlowResult<TransferOutput> {
        if let Some(kind) = self.failures.get(&item.key) {
            return Err(flow_error!(
                *kind,
                "scripted transfer failure",
                detail = format!("feature key {} is declared as failing", item.key)
            ));
        }

        self.transfers.lock().unwrap().push(item.clone());

        let mut output = TransferOutput::at(ObjectLocation::new(item.key, item.kind));
        if let Some(references) = self.references.get(&item.key) {
            for reference in references {
                output = output.with_reference(reference.clone());
            }
        }

        Ok(output)
    }

    async fn patch_reference(
        &self,
        _resource: &mut R,
        reference: &DeferredReference,
        target: ObjectLocation,
    ) -> FlowResult<()> {
        self.patches.lock().unwrap().push(AppliedPatch {
            reference: reference.clone(),
            target,
        });

        Ok(())
    }
}
