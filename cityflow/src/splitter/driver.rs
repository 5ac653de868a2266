use std::collections::HashSet;
use std::sync::Arc;

use cityflow_config::shared::FilterConfig;
use futures::StreamExt;
use tracing::{debug, info};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::concurrency::stream::InterruptibleStream;
use crate::error::FlowResult;
use crate::events::{EventBus, FlowEvent, InterruptEvent, InterruptLatch};
#[cfg(feature = "failpoints")]
use crate::failpoints::{DISCOVERY_BEFORE_SCAN, flow_fail_point};
use crate::splitter::discovery::FeatureDiscovery;
use crate::splitter::filters::{FilterChain, FilterDecision};
use crate::types::{FeatureKey, FeatureRow, TransferQuery, WorkItem};
use crate::workers::{PoolWorker, WorkerFactory, WorkerPool};

/// What one discovery run produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    /// Rows evaluated by the filter chain across all scans.
    pub scanned_rows: u64,
    /// Work items handed to the pool, including group traversal output.
    pub submitted_items: u64,
    /// Groups finalized by the traversal.
    pub groups_finalized: u64,
}

/// Traversal stack frame. `Enter` expands a group's nested groups,
/// `Finalize` submits its members, its parent, and finally the group itself.
enum Frame {
    Enter(FeatureRow),
    Finalize(FeatureRow),
}

/// Discovery-and-dispatch driver of one transfer run.
///
/// The splitter owns the producing side of the pipeline: it issues one
/// discovery query per selected feature kind, pushes every row through the
/// filter chain, and submits accepted rows as work items, suspending under
/// queue backpressure. Group features are never submitted from the scan;
/// they are collected as traversal roots and finalized after a full pool
/// rendezvous, so a group's members are always processed before the group
/// row that references them.
///
/// Cancellation is cooperative at row granularity: the interrupt latch is
/// checked before every row fetch and before every traversal frame, and the
/// shutdown signal wakes a scan suspended on a slow row fetch.
pub struct Splitter<D, F: WorkerFactory> {
    discovery: Arc<D>,
    pool: WorkerPool<F>,
    filters: FilterConfig,
    bus: Arc<EventBus>,
    latch: Arc<InterruptLatch>,
    shutdown_rx: ShutdownRx,
}

impl<D, F> Splitter<D, F>
where
    D: FeatureDiscovery,
    F: WorkerFactory,
    F::Worker: PoolWorker<Item = WorkItem>,
{
    pub fn new(
        discovery: Arc<D>,
        pool: WorkerPool<F>,
        filters: FilterConfig,
        bus: Arc<EventBus>,
        latch: Arc<InterruptLatch>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            discovery,
            pool,
            filters,
            bus,
            latch,
            shutdown_rx,
        }
    }

    /// Runs the full discovery of one transfer.
    ///
    /// Returns a partial summary when the interrupt latch trips mid-run.
    /// The first discovery or submission failure is published as a fatal
    /// interrupt before it is returned, so workers and the controller
    /// observe the same abort decision. Already-submitted items are never
    /// retracted.
    pub async fn run(&self, query: &TransferQuery) -> FlowResult<DiscoverySummary> {
        let result = self.discover(query).await;

        if let Err(error) = &result {
            self.bus.publish(FlowEvent::Interrupt(InterruptEvent::fatal(format!(
                "discovery failed: {error}"
            ))));
        }

        result
    }

    async fn discover(&self, query: &TransferQuery) -> FlowResult<DiscoverySummary> {
        let mut chain = FilterChain::new(&self.filters);
        let mut summary = DiscoverySummary::default();
        let mut roots: Vec<FeatureRow> = Vec::new();

        'scans: for kind in query.effective_kinds() {
            if self.latch.is_tripped() {
                debug!("discovery interrupted, skipping remaining queries");
                break;
            }

            #[cfg(feature = "failpoints")]
            flow_fail_point(DISCOVERY_BEFORE_SCAN)?;

            debug!(%kind, "starting discovery query");
            let rows = self.discovery.scan(kind, &self.filters).await?;
            let mut rows = InterruptibleStream::wrap(rows, self.shutdown_rx.clone());

            loop {
                if self.latch.is_tripped() {
                    debug!(%kind, "discovery interrupted mid-scan");
                    break 'scans;
                }

                let Some(next) = rows.next().await else {
                    break;
                };

                let row = match next {
                    ShutdownResult::Ok(row) => row?,
                    ShutdownResult::Shutdown(()) => {
                        debug!(%kind, "scan stopped by shutdown signal");
                        break 'scans;
                    }
                };

                match chain.evaluate(&row) {
                    FilterDecision::Accept => {}
                    FilterDecision::Skip => continue,
                    FilterDecision::Stop => {
                        debug!(scanned = chain.scanned(), "scan window exhausted");
                        break 'scans;
                    }
                }

                if row.kind.is_group() {
                    // Filters select which groups transfer; their members are
                    // pulled in by traversal afterwards, so group integrity
                    // survives filtering.
                    roots.push(row);
                    continue;
                }

                self.submit_row(row, false).await?;
                summary.submitted_items += 1;
            }
        }

        summary.scanned_rows = chain.scanned();

        if !roots.is_empty() && !self.latch.is_tripped() {
            debug!(roots = roots.len(), "starting group traversal");

            // Every primary object must be processed before the first group
            // member is checked for duplication.
            self.pool.join().await;
            self.traverse_groups(roots, &mut summary).await?;
        }

        info!(
            scanned_rows = summary.scanned_rows,
            submitted_items = summary.submitted_items,
            groups_finalized = summary.groups_finalized,
            "discovery finished"
        );

        Ok(summary)
    }

    /// Iterative post-order traversal of the group membership graph.
    ///
    /// The visited set is keyed by primary key and guarantees termination on
    /// cyclic graphs, including a group containing itself. Nested groups are
    /// finalized before the group that contains them.
    async fn traverse_groups(
        &self,
        roots: Vec<FeatureRow>,
        summary: &mut DiscoverySummary,
    ) -> FlowResult<()> {
        let mut visited: HashSet<FeatureKey> = HashSet::new();
        let mut stack: Vec<Frame> = Vec::new();

        // Reverse push keeps roots in discovery order.
        for root in roots.into_iter().rev() {
            stack.push(Frame::Enter(root));
        }

        while let Some(frame) = stack.pop() {
            if self.latch.is_tripped() {
                debug!("group traversal interrupted");
                return Ok(());
            }

            match frame {
                Frame::Enter(group) => {
                    if !visited.insert(group.key) {
                        continue;
                    }

                    let nested = self.discovery.nested_groups(group.key).await?;
                    stack.push(Frame::Finalize(group));
                    for nested_group in nested.into_iter().rev() {
                        stack.push(Frame::Enter(nested_group));
                    }
                }
                Frame::Finalize(group) => {
                    let members = self.discovery.group_members(group.key).await?;
                    for member in members {
                        if self.latch.is_tripped() {
                            return Ok(());
                        }

                        self.submit_row(member, true).await?;
                        summary.submitted_items += 1;
                    }

                    if let Some(parent) = self.discovery.group_parent(group.key).await? {
                        self.submit_row(parent, true).await?;
                        summary.submitted_items += 1;
                    }

                    // Members must be fully written before the group row
                    // itself, or the group would reference keys the target
                    // store cannot resolve yet.
                    self.pool.join().await;

                    if self.latch.is_tripped() {
                        return Ok(());
                    }

                    debug!(group = %group.key, "finalizing group");
                    self.submit_row(group, false).await?;
                    summary.submitted_items += 1;
                    summary.groups_finalized += 1;
                }
            }
        }

        Ok(())
    }

    async fn submit_row(&self, row: FeatureRow, check_duplicates: bool) -> FlowResult<()> {
        let FeatureRow {
            key,
            kind,
            identifier,
            payload,
            ..
        } = row;

        let mut item = WorkItem::new(key, kind);
        if let Some(identifier) = identifier {
            item = item.with_identifier(identifier);
        }
        if let Some(payload) = payload {
            item = item.with_payload(payload);
        }
        if check_duplicates {
            item = item.with_duplicate_check();
        }

        self.pool.submit(item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
    use crate::error::ErrorKind;
    use crate::events::{EventKind, EventSeverity, InterruptCause};
    use crate::flow_error;
    use crate::test_utils::discovery::ScriptedDiscovery;
    use crate::types::FeatureKind;
    use cityflow_config::shared::{
        BoundingBox, BoundingBoxFilterConfig, PoolConfig, RangeFilterConfig, SizingMode,
        SpatialMode,
    };
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct CollectingWorker {
        sink: Arc<StdMutex<Vec<WorkItem>>>,
    }

    impl PoolWorker for CollectingWorker {
        type Item = WorkItem;

        async fn process(&mut self, item: WorkItem) -> FlowResult<()> {
            self.sink.lock().unwrap().push(item);
            Ok(())
        }
    }

    struct CollectingFactory {
        sink: Arc<StdMutex<Vec<WorkItem>>>,
    }

    impl WorkerFactory for CollectingFactory {
        type Worker = CollectingWorker;

        async fn create_worker(&self, _worker_id: u64) -> FlowResult<CollectingWorker> {
            Ok(CollectingWorker {
                sink: self.sink.clone(),
            })
        }
    }

    struct Harness {
        splitter: Splitter<ScriptedDiscovery, CollectingFactory>,
        pool: WorkerPool<CollectingFactory>,
        discovery: Arc<ScriptedDiscovery>,
        bus: Arc<EventBus>,
        latch: Arc<InterruptLatch>,
        shutdown_tx: ShutdownTx,
        sink: Arc<StdMutex<Vec<WorkItem>>>,
    }

    fn pool_config(min_workers: u16, max_workers: u16) -> PoolConfig {
        PoolConfig {
            min_workers,
            max_workers,
            queue_capacity: 8,
            sizing: SizingMode::Fixed,
            sizing_interval_ms: 50,
        }
    }

    fn harness(discovery: ScriptedDiscovery, filters: FilterConfig, config: PoolConfig) -> Harness {
        let discovery = Arc::new(discovery);
        let bus = Arc::new(EventBus::new());
        let latch = Arc::new(InterruptLatch::new());
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let sink = Arc::new(StdMutex::new(Vec::new()));

        let pool = WorkerPool::new(
            CollectingFactory { sink: sink.clone() },
            config,
            bus.clone(),
            latch.clone(),
            shutdown_rx.clone(),
        );
        let splitter = Splitter::new(
            discovery.clone(),
            pool.clone(),
            filters,
            bus.clone(),
            latch.clone(),
            shutdown_rx,
        );

        Harness {
            splitter,
            pool,
            discovery,
            bus,
            latch,
            shutdown_tx,
            sink,
        }
    }

    fn building(key: i64) -> FeatureRow {
        FeatureRow::new(FeatureKey(key), FeatureKind::Building)
    }

    fn group(key: i64) -> FeatureRow {
        FeatureRow::new(FeatureKey(key), FeatureKind::CityObjectGroup)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submits_every_accepted_row_exactly_once() {
        let discovery = ScriptedDiscovery::new().add_rows((0..50).map(building));
        let harness = harness(discovery, FilterConfig::default(), pool_config(2, 2));
        harness.pool.start().await.unwrap();

        let summary = harness
            .splitter
            .run(&TransferQuery::for_kinds([FeatureKind::Building]))
            .await
            .unwrap();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert_eq!(summary.scanned_rows, 50);
        assert_eq!(summary.submitted_items, 50);
        assert_eq!(summary.groups_finalized, 0);

        let mut keys: Vec<i64> = harness
            .sink
            .lock()
            .unwrap()
            .iter()
            .map(|item| item.key.as_i64())
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rows_outside_the_bounding_box_are_skipped() {
        let rows = (0..10).map(|key| {
            building(key).with_envelope(BoundingBox::new(
                key as f64,
                0.0,
                key as f64 + 0.5,
                0.5,
            ))
        });
        let filters = FilterConfig {
            bounding_box: Some(BoundingBoxFilterConfig {
                bounds: BoundingBox::new(0.0, 0.0, 4.9, 10.0),
                mode: SpatialMode::Overlap,
            }),
            ..FilterConfig::default()
        };
        let harness = harness(
            ScriptedDiscovery::new().add_rows(rows),
            filters,
            pool_config(1, 1),
        );
        harness.pool.start().await.unwrap();

        let summary = harness
            .splitter
            .run(&TransferQuery::for_kinds([FeatureKind::Building]))
            .await
            .unwrap();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert_eq!(summary.scanned_rows, 10);
        assert_eq!(summary.submitted_items, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_scan_window_stops_all_discovery() {
        let discovery = ScriptedDiscovery::new()
            .add_rows((0..5).map(building))
            .add_rows((10..15).map(|key| FeatureRow::new(FeatureKey(key), FeatureKind::CityFurniture)));
        let filters = FilterConfig {
            range: Some(RangeFilterConfig {
                first: None,
                last: Some(3),
            }),
            ..FilterConfig::default()
        };
        let harness = harness(discovery, filters, pool_config(1, 1));
        harness.pool.start().await.unwrap();

        let summary = harness
            .splitter
            .run(&TransferQuery::for_kinds([
                FeatureKind::Building,
                FeatureKind::CityFurniture,
            ]))
            .await
            .unwrap();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert_eq!(summary.scanned_rows, 4);
        assert_eq!(summary.submitted_items, 3);
        // The second query never starts once the window is exhausted.
        assert_eq!(harness.discovery.scans_started(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_members_are_processed_before_their_group() {
        let discovery = ScriptedDiscovery::new()
            .add_row(group(100).with_identifier("group-a"))
            .with_topology(FeatureKey(100), vec![], vec![building(1), building(2)]);
        let harness = harness(discovery, FilterConfig::default(), pool_config(2, 2));
        harness.pool.start().await.unwrap();

        let summary = harness.splitter.run(&TransferQuery::all()).await.unwrap();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert_eq!(summary.groups_finalized, 1);
        assert_eq!(summary.submitted_items, 3);

        let items = harness.sink.lock().unwrap().clone();
        assert_eq!(items.len(), 3);
        // The rendezvous holds the group back until its members completed.
        assert_eq!(items[2].key, FeatureKey(100));
        assert!(!items[2].check_duplicates);
        assert!(items[0].check_duplicates);
        assert!(items[1].check_duplicates);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cyclic_group_graphs_terminate_with_single_finalization() {
        let discovery = ScriptedDiscovery::new()
            .add_row(group(100))
            .add_row(group(200))
            .with_topology(FeatureKey(100), vec![group(200)], vec![building(1)])
            .with_topology(FeatureKey(200), vec![group(100)], vec![building(2)]);
        let harness = harness(discovery, FilterConfig::default(), pool_config(1, 1));
        harness.pool.start().await.unwrap();

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            harness.splitter.run(&TransferQuery::all()),
        )
        .await
        .expect("cyclic traversal must terminate")
        .unwrap();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert_eq!(summary.groups_finalized, 2);
        assert_eq!(summary.submitted_items, 4);

        let items = harness.sink.lock().unwrap().clone();
        let group_submissions: Vec<i64> = items
            .iter()
            .filter(|item| item.kind.is_group())
            .map(|item| item.key.as_i64())
            .collect();
        // The nested group is finalized before the group containing it.
        assert_eq!(group_submissions, vec![200, 100]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn self_referencing_group_finalizes_once() {
        let discovery = ScriptedDiscovery::new()
            .add_row(group(100))
            .with_topology(FeatureKey(100), vec![group(100)], vec![building(1)]);
        let harness = harness(discovery, FilterConfig::default(), pool_config(1, 1));
        harness.pool.start().await.unwrap();

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            harness.splitter.run(&TransferQuery::all()),
        )
        .await
        .expect("self-referencing traversal must terminate")
        .unwrap();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert_eq!(summary.groups_finalized, 1);

        let finalizations = harness
            .sink
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.key == FeatureKey(100))
            .count();
        assert_eq!(finalizations, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_parent_is_submitted_with_duplicate_check() {
        let discovery = ScriptedDiscovery::new()
            .add_row(group(100))
            .with_topology(FeatureKey(100), vec![], vec![])
            .with_parent(FeatureKey(100), building(7));
        let harness = harness(discovery, FilterConfig::default(), pool_config(1, 1));
        harness.pool.start().await.unwrap();

        let summary = harness.splitter.run(&TransferQuery::all()).await.unwrap();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert_eq!(summary.submitted_items, 2);

        let items = harness.sink.lock().unwrap().clone();
        assert_eq!(items[0].key, FeatureKey(7));
        assert!(items[0].check_duplicates);
        assert_eq!(items[1].key, FeatureKey(100));
        assert!(!items[1].check_duplicates);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn discovery_errors_are_published_as_fatal_interrupts() {
        let discovery = ScriptedDiscovery::new()
            .add_row(building(1))
            .add_scan_error(
                FeatureKind::Building,
                flow_error!(ErrorKind::DiscoveryQueryFailed, "scan cursor lost"),
            );
        let harness = harness(discovery, FilterConfig::default(), pool_config(1, 1));
        harness.pool.start().await.unwrap();

        let interrupts = Arc::new(StdMutex::new(Vec::new()));
        let seen = interrupts.clone();
        harness.bus.subscribe(EventKind::Interrupt, move |event| {
            if let FlowEvent::Interrupt(interrupt) = event {
                seen.lock().unwrap().push(interrupt.clone());
            }
        });

        let error = harness
            .splitter
            .run(&TransferQuery::for_kinds([FeatureKind::Building]))
            .await
            .unwrap_err();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert_eq!(error.kind(), ErrorKind::DiscoveryQueryFailed);
        // The row submitted before the failure is not retracted.
        assert_eq!(harness.sink.lock().unwrap().len(), 1);

        let interrupts = interrupts.lock().unwrap();
        assert_eq!(interrupts.len(), 1);
        assert_eq!(interrupts[0].cause, InterruptCause::FatalError);
        assert_eq!(interrupts[0].severity, EventSeverity::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interrupt_stops_discovery_without_starting_further_queries() {
        let discovery = ScriptedDiscovery::new()
            .add_rows((0..200).map(building))
            .add_rows((200..210).map(|key| FeatureRow::new(FeatureKey(key), FeatureKind::CityFurniture)))
            .with_row_delay(Duration::from_millis(5));
        let harness = harness(discovery, FilterConfig::default(), pool_config(1, 1));
        harness.pool.start().await.unwrap();

        let latch = harness.latch.clone();
        let shutdown_tx = harness.shutdown_tx.clone();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            latch.trip(InterruptEvent::new(
                InterruptCause::UserRequested,
                "stop requested",
                EventSeverity::Info,
            ));
            shutdown_tx.shutdown().unwrap();
        });

        let summary = harness
            .splitter
            .run(&TransferQuery::for_kinds([
                FeatureKind::Building,
                FeatureKind::CityFurniture,
            ]))
            .await
            .unwrap();
        stopper.await.unwrap();
        harness.pool.shutdown_and_wait().await.unwrap();

        assert!(summary.submitted_items < 200);
        assert_eq!(harness.discovery.scans_started(), 1);
    }
}
