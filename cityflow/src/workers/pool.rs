use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::Duration;

use cityflow_config::shared::PoolConfig;
use futures::FutureExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, FlowResult};
use crate::events::{EventBus, FlowEvent, InterruptCause, InterruptEvent, InterruptLatch};
use crate::flow_error;
use crate::workers::base::{PoolWorker, WorkerFactory};
use crate::workers::policy::{FailureAction, classify_failure};
use crate::workers::queue::WorkQueue;
use crate::workers::sizing::PoolSizer;

type ItemOf<F> = <<F as WorkerFactory>::Worker as PoolWorker>::Item;

/// Point-in-time snapshot of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    /// Workers currently alive.
    pub active_workers: u16,
    /// Lower sizing bound.
    pub min_workers: u16,
    /// Upper sizing bound.
    pub max_workers: u16,
    /// Items submitted but not yet completed.
    pub outstanding_items: u64,
    /// True once the pool has stopped accepting work.
    pub stopping: bool,
}

/// Lock-free counters shared between the pool handle, its workers, and the
/// sizing monitor.
#[derive(Debug)]
struct PoolShared {
    active_workers: AtomicU16,
    target_workers: AtomicU16,
    next_worker_id: AtomicU64,
    started: AtomicBool,
    stopping: AtomicBool,
    /// Wakes parked workers so they re-check the shrink target.
    resize: Notify,
}

/// Owns all spawned tasks of one pool.
struct PoolTasks {
    join_set: JoinSet<()>,
    monitor: Option<JoinHandle<()>>,
}

/// Bounded adaptive pool of [`PoolWorker`]s consuming one shared
/// [`WorkQueue`].
///
/// The pool prestarts `min_workers` on [`start`](WorkerPool::start) and
/// resizes within `[min_workers, max_workers]` on a periodic monitor tick.
/// Worker failures are classified through
/// [`classify_failure`](crate::workers::classify_failure): resource failures
/// retire the failing worker, fatal failures publish an interrupt on the
/// bus. The last worker retiring while items are still outstanding also
/// publishes a fatal interrupt, since nobody is left to process them.
///
/// The handle is cheaply cloneable; all clones drive the same pool.
pub struct WorkerPool<F: WorkerFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    queue: Arc<WorkQueue<ItemOf<F>>>,
    bus: Arc<EventBus>,
    latch: Arc<InterruptLatch>,
    shutdown_rx: ShutdownRx,
    shared: Arc<PoolShared>,
    tasks: Arc<Mutex<PoolTasks>>,
}

impl<F: WorkerFactory> Clone for WorkerPool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            config: self.config.clone(),
            queue: self.queue.clone(),
            bus: self.bus.clone(),
            latch: self.latch.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
            shared: self.shared.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<F: WorkerFactory> WorkerPool<F> {
    /// Creates a stopped pool. No worker exists until
    /// [`start`](WorkerPool::start) is called.
    pub fn new(
        factory: F,
        config: PoolConfig,
        bus: Arc<EventBus>,
        latch: Arc<InterruptLatch>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(config.queue_capacity.max(1)));

        Self {
            factory: Arc::new(factory),
            config,
            queue,
            bus,
            latch,
            shutdown_rx,
            shared: Arc::new(PoolShared {
                active_workers: AtomicU16::new(0),
                target_workers: AtomicU16::new(0),
                next_worker_id: AtomicU64::new(0),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                resize: Notify::new(),
            }),
            tasks: Arc::new(Mutex::new(PoolTasks {
                join_set: JoinSet::new(),
                monitor: None,
            })),
        }
    }

    /// Prestarts the minimum worker count and launches the sizing monitor.
    ///
    /// Individual worker creation failures are logged; the start fails with
    /// [`ErrorKind::PoolStartFailed`] only when not a single worker could be
    /// created.
    pub async fn start(&self) -> FlowResult<()> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            bail!(ErrorKind::InvalidState, "worker pool has already been started");
        }

        let prestart = self.config.min_workers.max(1);
        self.shared.target_workers.store(prestart, Ordering::Release);

        let created = self.spawn_workers(prestart).await;
        if created == 0 {
            bail!(
                ErrorKind::PoolStartFailed,
                "no pool worker could be created",
                detail = format!("all {prestart} worker creation attempts failed")
            );
        }
        if created < prestart {
            warn!(
                requested = prestart,
                created, "pool started with fewer workers than configured"
            );
        }

        info!(
            workers = created,
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            sizing = ?self.config.sizing,
            "worker pool started"
        );

        let monitor = tokio::spawn(monitor_loop(self.clone(), self.shutdown_rx.clone()));
        self.tasks.lock().await.monitor = Some(monitor);

        Ok(())
    }

    /// Enqueues one item, suspending under backpressure.
    pub async fn submit(&self, item: ItemOf<F>) -> FlowResult<()> {
        self.queue.submit(item).await
    }

    /// Waits until every submitted item has completed. Rendezvous barrier
    /// between dependent discovery phases.
    pub async fn join(&self) {
        self.queue.join().await;
    }

    /// Discards all queued-but-unstarted items; in-flight items finish.
    pub fn drain(&self) -> usize {
        let removed = self.queue.drain();
        if removed > 0 {
            debug!(removed, "discarded queued work items");
        }
        removed
    }

    /// Returns a snapshot of the pool's counters.
    pub fn state(&self) -> PoolState {
        PoolState {
            active_workers: self.shared.active_workers.load(Ordering::Acquire),
            min_workers: self.config.min_workers,
            max_workers: self.config.max_workers,
            outstanding_items: self.queue.outstanding(),
            stopping: self.shared.stopping.load(Ordering::Acquire),
        }
    }

    /// Stops accepting work, lets queued and in-flight items finish, and
    /// waits for every worker task to end.
    pub async fn shutdown_and_wait(&self) -> FlowResult<()> {
        self.shared.stopping.store(true, Ordering::Release);
        {
            let mut tasks = self.tasks.lock().await;
            if let Some(monitor) = tasks.monitor.take() {
                monitor.abort();
            }
        }
        self.queue.close();

        debug!("waiting for pool workers to stop");
        self.wait_all().await
    }

    /// Aborts all worker tasks immediately. Last-resort hard stop after an
    /// interrupt has already been handled.
    pub async fn shutdown_now(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.queue.close();

        let mut tasks = self.tasks.lock().await;
        if let Some(monitor) = tasks.monitor.take() {
            monitor.abort();
        }
        tasks.join_set.abort_all();
        while tasks.join_set.join_next().await.is_some() {}

        debug!("worker pool aborted");
    }

    /// Creates and spawns up to `count` workers, returning how many were
    /// actually created.
    async fn spawn_workers(&self, count: u16) -> u16 {
        let mut created = 0;

        for _ in 0..count {
            let worker_id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);

            match self.factory.create_worker(worker_id).await {
                Ok(worker) => {
                    self.shared.active_workers.fetch_add(1, Ordering::AcqRel);

                    let worker_span = tracing::info_span!("pool_worker", worker_id);
                    let task = run_worker(
                        worker_id,
                        worker,
                        self.queue.clone(),
                        self.latch.clone(),
                        self.shared.clone(),
                        self.bus.clone(),
                    )
                    .instrument(worker_span.or_current());
                    self.tasks.lock().await.join_set.spawn(task);

                    created += 1;
                }
                Err(error) => {
                    warn!(worker_id, error = %error, "failed to create pool worker");
                }
            }
        }

        created
    }

    /// Waits for all worker tasks to complete, collecting panics.
    async fn wait_all(&self) -> FlowResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut tasks = self.tasks.lock().await;
                tasks.join_set.join_next().await
            };

            let Some(result) = result else {
                // JoinSet is empty, all workers have stopped.
                break;
            };

            if let Err(join_err) = result {
                if join_err.is_cancelled() {
                    debug!("pool worker task was cancelled");
                } else {
                    errors.push(flow_error!(
                        ErrorKind::WorkerPanic,
                        "pool worker panicked",
                        join_err
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

/// Consume loop of one worker task.
///
/// The interrupt latch is checked before every unit of work; the shrink
/// target is re-checked on every wakeup so a lowered target takes effect
/// without waiting for the next item.
async fn run_worker<W: PoolWorker>(
    worker_id: u64,
    mut worker: W,
    queue: Arc<WorkQueue<W::Item>>,
    latch: Arc<InterruptLatch>,
    shared: Arc<PoolShared>,
    bus: Arc<EventBus>,
) {
    debug!(worker_id, "pool worker started");
    let mut exited_for_shrink = false;

    loop {
        if latch.is_tripped() {
            debug!(worker_id, "worker observed interrupt, stopping");
            break;
        }

        // Self-shrink when the monitor lowered the target below the active
        // count. The compare-exchange reserves this worker's exit, so
        // exactly as many workers leave as the target demands.
        let active = shared.active_workers.load(Ordering::Acquire);
        let target = shared.target_workers.load(Ordering::Acquire);
        if active > target
            && shared
                .active_workers
                .compare_exchange(active, active - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            exited_for_shrink = true;
            debug!(worker_id, "worker retired by pool shrink");
            break;
        }

        let popped = tokio::select! {
            biased;
            _ = shared.resize.notified() => continue,
            popped = queue.pop() => popped,
        };
        let Some(item) = popped else {
            debug!(worker_id, "work queue closed, worker stopping");
            break;
        };

        let outcome = AssertUnwindSafe(worker.process(item)).catch_unwind().await;
        queue.complete_one();

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => match classify_failure(&error) {
                FailureAction::SkipItem => {
                    warn!(worker_id, error = %error, "item failed, skipping");
                }
                FailureAction::RetireWorker => {
                    warn!(
                        worker_id,
                        error = %error,
                        "worker resource failed, retiring worker"
                    );
                    break;
                }
                FailureAction::Abort => {
                    error!(worker_id, error = %error, "fatal worker error, aborting transfer");
                    bus.publish(FlowEvent::Interrupt(InterruptEvent::fatal(format!(
                        "worker {worker_id} failed: {error}"
                    ))));
                    break;
                }
            },
            Err(_) => {
                error!(worker_id, "worker panicked while processing an item");
                bus.publish(FlowEvent::Interrupt(InterruptEvent::fatal(format!(
                    "worker {worker_id} panicked while processing an item"
                ))));
                break;
            }
        }
    }

    worker.retire().await;

    if !exited_for_shrink {
        let previous = shared.active_workers.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 && !shared.stopping.load(Ordering::Acquire) && queue.outstanding() > 0 {
            warn!(worker_id, "last worker retired with items outstanding");
            bus.publish(FlowEvent::Interrupt(InterruptEvent::new(
                InterruptCause::WorkersExhausted,
                "no workers remain while transfer items are outstanding",
                crate::events::EventSeverity::Error,
            )));
        }
    }

    debug!(worker_id, "pool worker stopped");
}

/// Periodic sizing task. Consults the sizer on every tick and either spawns
/// additional workers or lowers the target for workers to shrink against.
async fn monitor_loop<F: WorkerFactory>(pool: WorkerPool<F>, mut shutdown_rx: ShutdownRx) {
    let mut sizer = PoolSizer::new(
        pool.config.sizing,
        pool.config.min_workers,
        pool.config.max_workers,
    );
    let mut ticker =
        tokio::time::interval(Duration::from_millis(pool.config.sizing_interval_ms.max(1)));

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                break;
            }
            _ = ticker.tick() => {}
        }

        if pool.shared.stopping.load(Ordering::Acquire) {
            break;
        }

        let queue_depth = pool.queue.len();
        let active = pool.shared.active_workers.load(Ordering::Acquire);
        let Some(target) = sizer.evaluate(queue_depth, pool.config.queue_capacity, active) else {
            continue;
        };

        pool.shared.target_workers.store(target, Ordering::Release);

        if target > active {
            let created = pool.spawn_workers(target - active).await;
            if created > 0 {
                info!(
                    from = active,
                    to = active + created,
                    queue_depth,
                    "worker pool grown"
                );
            }
        } else {
            info!(from = active, to = target, "worker pool shrinking");
            pool.shared.resize.notify_waiters();
        }
    }

    debug!("pool sizing monitor stopped");
}
