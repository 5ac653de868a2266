use std::future::Future;

use cityflow_config::shared::FilterConfig;
use futures::Stream;

use crate::error::FlowResult;
use crate::types::{FeatureKey, FeatureKind, FeatureRow, TransferQuery};

/// Trait for the discovery side of a transfer.
///
/// [`FeatureDiscovery`] is the seam between the splitter and the store
/// schema layer: it turns a feature category into a lazy row stream and
/// answers the membership questions of group traversal. Implementations run
/// the actual discovery queries; the splitter owns filtering, ordering, and
/// submission.
///
/// A scan stream is restartable only by calling [`scan`](Self::scan) again;
/// it is not resumable after an error. Implementations may push parts of the
/// filter set into their queries as an optimization, but the splitter always
/// re-applies every filter per row.
pub trait FeatureDiscovery: Send + Sync + 'static {
    /// Lazy sequence of rows for one feature category.
    type Rows: Stream<Item = FlowResult<FeatureRow>> + Send + Unpin;

    /// Starts one discovery query for `kind`.
    fn scan(
        &self,
        kind: FeatureKind,
        filters: &FilterConfig,
    ) -> impl Future<Output = FlowResult<Self::Rows>> + Send;

    /// Group keys directly nested inside `group`.
    ///
    /// Rows are returned so an unvisited nested group can be enqueued
    /// without another lookup. Cycles are permitted; the splitter's visited
    /// set keeps traversal finite.
    fn nested_groups(
        &self,
        group: FeatureKey,
    ) -> impl Future<Output = FlowResult<Vec<FeatureRow>>> + Send;

    /// Non-group members of `group`.
    fn group_members(
        &self,
        group: FeatureKey,
    ) -> impl Future<Output = FlowResult<Vec<FeatureRow>>> + Send;

    /// The feature `group` is itself attached to, if any.
    fn group_parent(
        &self,
        group: FeatureKey,
    ) -> impl Future<Output = FlowResult<Option<FeatureRow>>> + Send;

    /// Estimated number of rows the scans of `query` will produce, used for
    /// progress reporting. Implementations without a cheap estimate return
    /// [`None`], degrading progress events to done-counts.
    fn estimate(
        &self,
        query: &TransferQuery,
        filters: &FilterConfig,
    ) -> impl Future<Output = FlowResult<Option<u64>>> + Send {
        let _ = (query, filters);
        async { Ok(None) }
    }
}
