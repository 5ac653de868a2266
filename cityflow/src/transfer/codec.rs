use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ErrorKind, FlowResult};
use crate::flow_error;
use crate::types::{DeferredReference, FeatureKind, ObjectLocation, ReferencePatch, WorkItem};

/// A by-identifier reference discovered while converting a feature.
///
/// The codec reports these in its [`TransferOutput`]; the worker resolves
/// them against the cross-reference cache, either patching immediately or
/// parking the reference until the target identifier is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingReference {
    /// Identifier of the referenced feature.
    pub target: String,
    /// How to rewrite the reference once the target location is known.
    pub patch: ReferencePatch,
}

impl OutgoingReference {
    pub fn new(target: impl Into<String>, patch: ReferencePatch) -> Self {
        Self {
            target: target.into(),
            patch,
        }
    }
}

/// What a codec produced for one work item.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutput {
    /// Where the transferred feature ended up.
    pub location: ObjectLocation,
    /// By-identifier references the feature holds toward other features.
    pub references: Vec<OutgoingReference>,
}

impl TransferOutput {
    /// Output for a feature without outgoing references.
    pub fn at(location: ObjectLocation) -> Self {
        Self {
            location,
            references: Vec::new(),
        }
    }

    /// Adds one outgoing reference to the output.
    pub fn with_reference(mut self, reference: OutgoingReference) -> Self {
        self.references.push(reference);
        self
    }
}

/// Converts work items to or from the external exchange representation.
///
/// One codec handles one feature kind (or acts as the fallback for all
/// kinds without a dedicated entry). All writes go through the worker's
/// exclusively owned `resource`; a codec must not keep mutable state shared
/// across workers.
///
/// Item-scoped failures should be reported with the item error kinds
/// ([`ErrorKind::ItemConversionFailed`], [`ErrorKind::ItemWriteFailed`],
/// [`ErrorKind::InvalidData`]) so the worker can skip the item and keep the
/// transfer alive. Connection-level kinds retire the worker instead.
#[async_trait]
pub trait ItemCodec<R>: Send + Sync {
    /// Transfers one work item through the worker's owned resource.
    ///
    /// Returns the location the feature landed at and the by-identifier
    /// references it holds.
    async fn transfer(&self, resource: &mut R, item: &WorkItem) -> FlowResult<TransferOutput>;

    /// Rewrites one previously deferred reference now that its target is
    /// known.
    ///
    /// `reference.patch` names the attribute of the referencing feature;
    /// interpreting it is entirely up to the codec that wrote that feature.
    async fn patch_reference(
        &self,
        resource: &mut R,
        reference: &DeferredReference,
        target: ObjectLocation,
    ) -> FlowResult<()>;
}

/// Per-kind codec lookup, built once before a run starts.
///
/// The registry maps each [`FeatureKind`] to its codec, with an optional
/// fallback for kinds without a dedicated entry. A kind that resolves to
/// neither is a configuration error; the first item of that kind aborts the
/// run rather than silently dropping features.
pub struct CodecRegistry<R> {
    codecs: HashMap<FeatureKind, Arc<dyn ItemCodec<R>>>,
    fallback: Option<Arc<dyn ItemCodec<R>>>,
}

impl<R> CodecRegistry<R> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
            fallback: None,
        }
    }

    /// Registers `codec` for `kind`, replacing any previous registration.
    pub fn register(mut self, kind: FeatureKind, codec: Arc<dyn ItemCodec<R>>) -> Self {
        self.codecs.insert(kind, codec);
        self
    }

    /// Registers the codec used for kinds without a dedicated entry.
    pub fn with_fallback(mut self, codec: Arc<dyn ItemCodec<R>>) -> Self {
        self.fallback = Some(codec);
        self
    }

    /// Resolves the codec for `kind`.
    pub fn get(&self, kind: FeatureKind) -> FlowResult<Arc<dyn ItemCodec<R>>> {
        self.codecs
            .get(&kind)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                flow_error!(
                    ErrorKind::ConfigError,
                    "no codec registered for feature kind",
                    detail = format!("feature kind {kind} has no codec and no fallback is set")
                )
            })
    }
}

impl<R> Default for CodecRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for CodecRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            codecs: self.codecs.clone(),
            fallback: self.fallback.clone(),
        }
    }
}
