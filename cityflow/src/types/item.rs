use crate::types::{FeatureKey, FeatureKind};

/// One unit of work flowing from the splitter to a worker.
///
/// [`WorkItem`] is immutable once enqueued: the splitter constructs it, one
/// worker consumes it exactly once, and it is dropped after processing. The
/// payload is an opaque document handed through to the codec; export-side
/// items carry no payload because the codec reads the feature from its own
/// store resource.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Primary key of the feature this item transfers.
    pub key: FeatureKey,
    /// Category of the feature, used for codec dispatch and counting.
    pub kind: FeatureKind,
    /// External identifier, when known at discovery time.
    pub identifier: Option<String>,
    /// Opaque feature document for import-direction transfers.
    pub payload: Option<serde_json::Value>,
    /// Whether the worker must consult the cross-reference cache before
    /// processing, because the feature may already have been transferred in
    /// an earlier phase. Set for group members.
    pub check_duplicates: bool,
}

impl WorkItem {
    /// Creates a work item with no payload and duplicate checking disabled.
    pub fn new(key: FeatureKey, kind: FeatureKind) -> Self {
        Self {
            key,
            kind,
            identifier: None,
            payload: None,
            check_duplicates: false,
        }
    }

    /// Sets the external identifier carried by this item.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Attaches the feature document processed by import-direction codecs.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Marks this item as possibly already transferred in an earlier phase.
    pub fn with_duplicate_check(mut self) -> Self {
        self.check_duplicates = true;
        self
    }
}
