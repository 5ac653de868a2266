use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use cityflow_config::shared::{CacheBackend, FilterConfig, TransferConfig};
use tracing::{error, info, warn};

use crate::bail;
use crate::cache::{CacheStore, CrossReferenceCache, MemoryCacheStore, PostgresCacheStore};
use crate::concurrency::shutdown::{ShutdownRx, create_shutdown_channel};
use crate::error::{ErrorKind, FlowResult};
use crate::events::{
    CounterEvent, EventBus, EventKind, EventSeverity, FlowEvent, InterruptCause, InterruptEvent,
    InterruptLatch,
};
use crate::splitter::{DiscoverySummary, FeatureDiscovery, Splitter};
use crate::transfer::codec::CodecRegistry;
use crate::transfer::report::{TransferOutcome, TransferReport};
use crate::transfer::resource::ResourceFactory;
use crate::transfer::sink::TransferSink;
use crate::transfer::worker::TransferWorkerFactory;
use crate::types::{TransferDirection, TransferQuery};
use crate::workers::WorkerPool;

/// Unresolved-reference targets listed in the end-of-run warning.
const UNRESOLVED_SAMPLE: usize = 10;

type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Lifecycle of a [`TransferController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Constructed, no run started yet.
    Idle,
    /// A run is in flight.
    Running,
    /// The run finished with every submitted item consumed.
    Completed,
    /// The run was interrupted.
    Aborted,
}

/// Handle for requesting cancellation of a running transfer.
///
/// Cheap to clone and safe to use from any task. The request travels over
/// the controller's event bus and is honored cooperatively at the next
/// latch check; requests issued before the run has started are not
/// recorded.
#[derive(Clone)]
pub struct InterruptHandle {
    bus: Arc<EventBus>,
}

impl InterruptHandle {
    /// Requests cancellation, with a reason shown in logs and the report.
    pub fn interrupt(&self, reason: impl Into<String>) {
        self.bus.publish(FlowEvent::Interrupt(InterruptEvent::new(
            InterruptCause::UserRequested,
            reason,
            EventSeverity::Info,
        )));
    }
}

/// Owns one transfer run end to end.
///
/// The controller wires the engine together: it builds the cross-reference
/// cache for the configured backend, starts the worker pool, drives the
/// splitter, merges per-worker counters, and turns the outcome into a
/// [`TransferReport`]. Fatal failures inside the run surface as an
/// [`TransferOutcome::Aborted`] report; an `Err` return is reserved for
/// invalid configuration and controller reuse.
///
/// A controller drives exactly one run. Interrupts reach it through the
/// [`InterruptHandle`] or any fatal event published by its components; the
/// first interrupt wins, the backlog is discarded, in-flight items finish,
/// the sink is rolled back best-effort, and the cache is torn down. On
/// completion the sink is committed; a commit failure aborts the run.
pub struct TransferController<D, RF, K>
where
    RF: ResourceFactory,
{
    config: TransferConfig,
    discovery: Arc<D>,
    resources: Arc<RF>,
    codecs: Arc<CodecRegistry<RF::Resource>>,
    sink: K,
    bus: Arc<EventBus>,
    progress: Option<ProgressCallback>,
    state: ControllerState,
}

impl<D, RF, K> TransferController<D, RF, K>
where
    D: FeatureDiscovery,
    RF: ResourceFactory,
    K: TransferSink,
{
    pub fn new(
        config: TransferConfig,
        discovery: Arc<D>,
        resources: Arc<RF>,
        codecs: CodecRegistry<RF::Resource>,
        sink: K,
    ) -> Self {
        Self {
            config,
            discovery,
            resources,
            codecs: Arc::new(codecs),
            sink,
            bus: Arc::new(EventBus::new()),
            progress: None,
            state: ControllerState::Idle,
        }
    }

    /// Registers a callback receiving (items done, estimated total) after
    /// every consumed item.
    pub fn with_progress<P>(mut self, callback: P) -> Self
    where
        P: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Handle for requesting cancellation from another task.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            bus: self.bus.clone(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Runs an export of the selected features to completion or abort.
    pub async fn run_export(
        &mut self,
        query: &TransferQuery,
        filters: &FilterConfig,
    ) -> FlowResult<TransferReport> {
        self.run(TransferDirection::Export, query, filters).await
    }

    /// Runs an import of the selected features to completion or abort.
    pub async fn run_import(
        &mut self,
        query: &TransferQuery,
        filters: &FilterConfig,
    ) -> FlowResult<TransferReport> {
        self.run(TransferDirection::Import, query, filters).await
    }

    /// Runs a delete pass over the selected features.
    ///
    /// Deletes run on a single worker regardless of the configured pool
    /// bounds, because overlapping deletes of a group and its members can
    /// deadlock the store.
    pub async fn run_delete(
        &mut self,
        query: &TransferQuery,
        filters: &FilterConfig,
    ) -> FlowResult<TransferReport> {
        self.run(TransferDirection::Delete, query, filters).await
    }

    async fn run(
        &mut self,
        direction: TransferDirection,
        query: &TransferQuery,
        filters: &FilterConfig,
    ) -> FlowResult<TransferReport> {
        if self.state != ControllerState::Idle {
            bail!(
                ErrorKind::InvalidState,
                "transfer controller cannot be reused",
                detail = format!(
                    "controller state is {:?} and each controller drives one run",
                    self.state
                )
            );
        }

        if let Err(error) = self.config.validate() {
            bail!(ErrorKind::ConfigError, "invalid transfer configuration", error);
        }
        if let Err(error) = filters.validate() {
            bail!(ErrorKind::ConfigError, "invalid filter configuration", error);
        }

        self.state = ControllerState::Running;

        info!(
            transfer_id = self.config.id,
            %direction,
            workspace = self.config.workspace.as_deref().unwrap_or("live"),
            "starting transfer run"
        );

        let started_at = Utc::now();
        let started = Instant::now();

        let report = match &self.config.cache.backend {
            CacheBackend::Memory {
                spill_directory,
                max_entries_in_memory,
            } => {
                let store = MemoryCacheStore::with_settings(
                    self.config.cache.partitions,
                    *max_entries_in_memory,
                    spill_directory.clone(),
                );
                self.execute(direction, query, filters, store, started_at, started)
                    .await
            }
            CacheBackend::Database => {
                let store = PostgresCacheStore::new(&self.config.connection);
                self.execute(direction, query, filters, store, started_at, started)
                    .await
            }
        };

        self.state = match report.outcome {
            TransferOutcome::Completed => ControllerState::Completed,
            TransferOutcome::Aborted { .. } => ControllerState::Aborted,
        };

        Ok(report)
    }

    /// One complete run against a concrete cache store.
    async fn execute<S>(
        &self,
        direction: TransferDirection,
        query: &TransferQuery,
        filters: &FilterConfig,
        store: S,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> TransferReport
    where
        S: CacheStore + Clone + Send + Sync + 'static,
    {
        let bus = self.bus.clone();
        let latch = Arc::new(InterruptLatch::new());
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let cache = CrossReferenceCache::new(store, self.config.cache.on_duplicate);

        let pool_config = if direction == TransferDirection::Delete {
            self.config.pool.single_worker()
        } else {
            self.config.pool.clone()
        };

        let factory = TransferWorkerFactory::new(
            self.resources.clone(),
            self.codecs.clone(),
            cache.clone(),
            bus.clone(),
        );
        let pool = WorkerPool::new(
            factory,
            pool_config,
            bus.clone(),
            latch.clone(),
            shutdown_rx.clone(),
        );

        let interrupt_subscription = {
            let latch = latch.clone();
            let pool = pool.clone();
            bus.subscribe(EventKind::Interrupt, move |event| {
                let FlowEvent::Interrupt(interrupt) = event else {
                    return;
                };
                if !latch.trip(interrupt.clone()) {
                    return;
                }

                match interrupt.severity {
                    EventSeverity::Info => info!(
                        cause = %interrupt.cause,
                        message = %interrupt.message,
                        "transfer interrupted"
                    ),
                    EventSeverity::Warn => warn!(
                        cause = %interrupt.cause,
                        message = %interrupt.message,
                        "transfer interrupted"
                    ),
                    EventSeverity::Error => error!(
                        cause = %interrupt.cause,
                        message = %interrupt.message,
                        "transfer interrupted"
                    ),
                }

                // Discarding the backlog frees the bounded queue, so a
                // splitter suspended in submit wakes up and observes the
                // latch. In-flight items finish on their workers.
                pool.drain();
                let _ = shutdown_tx.shutdown();
            })
        };

        let merged_counters = Arc::new(StdMutex::new(CounterEvent::default()));
        let counter_subscription = {
            let merged = merged_counters.clone();
            bus.subscribe(EventKind::ObjectCounter, move |event| {
                if let FlowEvent::ObjectCounter(update) = event {
                    merged
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .merge(update);
                }
            })
        };

        let estimate = match self.discovery.estimate(query, filters).await {
            Ok(estimate) => estimate,
            Err(error) => {
                warn!(error = %error, "progress estimate failed, reporting done counts only");
                None
            }
        };
        let progress_subscription = self.progress.clone().map(|callback| {
            let done = Arc::new(AtomicU64::new(0));
            bus.subscribe(EventKind::Progress, move |event| {
                if let FlowEvent::Progress(progress) = event {
                    let total =
                        done.fetch_add(progress.completed, Ordering::AcqRel) + progress.completed;
                    callback(total, estimate);
                }
            })
        });

        let run_result = self
            .drive(query, filters, &cache, &pool, bus.clone(), latch.clone(), shutdown_rx)
            .await;

        if let Err(error) = &run_result {
            // The splitter publishes its own failures; this covers cache
            // preparation and pool start. Publishing against an already
            // tripped latch changes nothing.
            bus.publish(FlowEvent::Interrupt(InterruptEvent::fatal(format!(
                "transfer failed: {error}"
            ))));
        }

        if let Err(error) = pool.shutdown_and_wait().await {
            warn!(error = %error, "worker pool reported failures during shutdown");
        }

        let unresolved = match cache.unresolved_at_end().await {
            Ok(unresolved) => unresolved,
            Err(error) => {
                warn!(error = %error, "failed to collect unresolved references");
                Vec::new()
            }
        };

        let outcome = match latch.cause() {
            Some(interrupt) => {
                if let Err(error) = self.sink.rollback().await {
                    warn!(error = %error, "rollback after abort failed");
                }
                TransferOutcome::Aborted {
                    cause: interrupt.cause,
                    message: interrupt.message.clone(),
                }
            }
            None => match self.sink.commit().await {
                Ok(()) => TransferOutcome::Completed,
                Err(error) => {
                    error!(error = %error, "commit of transfer output failed");
                    if let Err(rollback_error) = self.sink.rollback().await {
                        warn!(error = %rollback_error, "rollback after failed commit failed");
                    }
                    TransferOutcome::Aborted {
                        cause: InterruptCause::FatalError,
                        message: format!("commit failed: {error}"),
                    }
                }
            },
        };

        if let Err(error) = cache.teardown().await {
            warn!(error = %error, "cross-reference cache teardown failed");
        }

        bus.unsubscribe(EventKind::Interrupt, interrupt_subscription);
        bus.unsubscribe(EventKind::ObjectCounter, counter_subscription);
        if let Some(subscription) = progress_subscription {
            bus.unsubscribe(EventKind::Progress, subscription);
        }

        let counters = merged_counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let duration = started.elapsed();

        match &outcome {
            TransferOutcome::Completed => {
                info!(
                    processed = counters.total_processed(),
                    failed = counters.failed,
                    skipped_duplicates = counters.skipped_duplicates,
                    duration_ms = duration.as_millis() as u64,
                    "transfer completed"
                );
                for (kind, count) in &counters.processed {
                    info!(%kind, count = *count, "feature kind summary");
                }
            }
            TransferOutcome::Aborted { cause, message } => {
                error!(
                    %cause,
                    message = %message,
                    duration_ms = duration.as_millis() as u64,
                    "transfer aborted"
                );
            }
        }

        if !unresolved.is_empty() {
            let sample: Vec<&str> = unresolved
                .iter()
                .take(UNRESOLVED_SAMPLE)
                .map(|reference| reference.target.as_str())
                .collect();
            warn!(
                unresolved = unresolved.len(),
                sample = ?sample,
                "references to identifiers that never arrived"
            );
        }

        TransferReport {
            outcome,
            counters,
            discovery: run_result.unwrap_or_default(),
            unresolved,
            started_at,
            duration,
        }
    }

    /// Prepares the cache, starts the pool, and runs discovery.
    async fn drive<S>(
        &self,
        query: &TransferQuery,
        filters: &FilterConfig,
        cache: &CrossReferenceCache<S>,
        pool: &WorkerPool<TransferWorkerFactory<S, RF>>,
        bus: Arc<EventBus>,
        latch: Arc<InterruptLatch>,
        shutdown_rx: ShutdownRx,
    ) -> FlowResult<DiscoverySummary>
    where
        S: CacheStore + Clone + Send + Sync + 'static,
    {
        cache.prepare().await?;
        pool.start().await?;

        let splitter = Splitter::new(
            self.discovery.clone(),
            pool.clone(),
            filters.clone(),
            bus,
            latch,
            shutdown_rx,
        );

        splitter.run(query).await
    }
}
