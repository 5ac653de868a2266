use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cityflow_config::shared::FilterConfig;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::{FlowError, FlowResult};
use crate::splitter::FeatureDiscovery;
use crate::types::{FeatureKey, FeatureKind, FeatureRow, TransferQuery};

/// Scripted in-memory discovery source.
///
/// Scan rows are declared per kind and streamed back in declaration order.
/// Group topology is declared per group key. Errors can be injected either
/// inline after any number of rows or as a whole failing scan, and an
/// optional per-row delay keeps scans slow enough for cancellation tests to
/// interrupt them mid-stream.
#[derive(Debug, Default)]
pub struct ScriptedDiscovery {
    rows: HashMap<FeatureKind, Vec<Result<FeatureRow, FlowError>>>,
    nested: HashMap<FeatureKey, Vec<FeatureRow>>,
    members: HashMap<FeatureKey, Vec<FeatureRow>>,
    parents: HashMap<FeatureKey, FeatureRow>,
    row_delay: Option<Duration>,
    row_estimate: Option<u64>,
    scans_started: AtomicU64,
}

impl ScriptedDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one scan row under its kind.
    pub fn add_row(mut self, row: FeatureRow) -> Self {
        self.rows.entry(row.kind).or_default().push(Ok(row));
        self
    }

    /// Adds many scan rows.
    pub fn add_rows(mut self, rows: impl IntoIterator<Item = FeatureRow>) -> Self {
        for row in rows {
            self = self.add_row(row);
        }
        self
    }

    /// Injects an error into the scan of `kind`, yielded after any rows
    /// already declared for that kind.
    pub fn add_scan_error(mut self, kind: FeatureKind, error: FlowError) -> Self {
        self.rows.entry(kind).or_default().push(Err(error));
        self
    }

    /// Declares the nested groups and non-group members of `group`.
    ///
    /// Nested entries may reference groups that are also scan roots, or each
    /// other in a cycle; traversal termination is the splitter's problem,
    /// not the fixture's.
    pub fn with_topology(
        mut self,
        group: FeatureKey,
        nested: Vec<FeatureRow>,
        members: Vec<FeatureRow>,
    ) -> Self {
        self.nested.insert(group, nested);
        self.members.insert(group, members);
        self
    }

    /// Declares the feature `group` is itself attached to.
    pub fn with_parent(mut self, group: FeatureKey, parent: FeatureRow) -> Self {
        self.parents.insert(group, parent);
        self
    }

    /// Delays every streamed row by `delay`.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = Some(delay);
        self
    }

    /// Sets the row estimate reported to progress consumers.
    pub fn with_estimate(mut self, estimate: u64) -> Self {
        self.row_estimate = Some(estimate);
        self
    }

    /// Number of scans started so far.
    pub fn scans_started(&self) -> u64 {
        self.scans_started.load(Ordering::Acquire)
    }
}

impl FeatureDiscovery for ScriptedDiscovery {
    type Rows = BoxStream<'static, FlowResult<FeatureRow>>;

    async fn scan(&self, kind: FeatureKind, _filters: &FilterConfig) -> FlowResult<Self::Rows> {
        self.scans_started.fetch_add(1, Ordering::AcqRel);

        let rows = self.rows.get(&kind).cloned().unwrap_or_default();
        let stream = futures::stream::iter(rows);

        Ok(match self.row_delay {
            Some(delay) => stream
                .then(move |row| async move {
                    tokio::time::sleep(delay).await;
                    row
                })
                .boxed(),
            None => stream.boxed(),
        })
    }

    async fn nested_groups(&self, group: FeatureKey) -> FlowResult<Vec<FeatureRow>> {
        Ok(self.nested.get(&group).cloned().unwrap_or_default())
    }

    async fn group_members(&self, group: FeatureKey) -> FlowResult<Vec<FeatureRow>> {
        Ok(self.members.get(&group).cloned().unwrap_or_default())
    }

    async fn group_parent(&self, group: FeatureKey) -> FlowResult<Option<FeatureRow>> {
        Ok(self.parents.get(&group).cloned())
    }

    async fn estimate(
        &self,
        _query: &TransferQuery,
        _filters: &FilterConfig,
    ) -> FlowResult<Option<u64>> {
        Ok(self.row_estimate)
    }
}
