use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{Notify, watch};

use crate::bail;
use crate::error::{ErrorKind, FlowResult};

/// Bounded multi-consumer queue carrying work items from the splitter to
/// the pool workers.
///
/// [`submit`](WorkQueue::submit) suspends the producer while the queue is
/// at capacity, so discovery can never outrun the workers by more than the
/// configured depth. The queue tracks an outstanding count of items that
/// were submitted but not yet completed; [`join`](WorkQueue::join) is a
/// rendezvous on that count reaching zero, used between dependent discovery
/// phases.
///
/// Wakeups follow the notify-with-reservation pattern: waiters register
/// interest before re-checking state under the lock, so a notification
/// between the check and the await is never lost.
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Mutex<QueueInner<T>>,
    capacity: usize,
    item_available: Notify,
    space_available: Notify,
    outstanding: watch::Sender<u64>,
}

#[derive(Debug)]
struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T: Send> WorkQueue<T> {
    /// Creates a queue holding at most `capacity` pending items.
    pub fn new(capacity: usize) -> Self {
        let (outstanding, _) = watch::channel(0);

        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            item_available: Notify::new(),
            space_available: Notify::new(),
            outstanding,
        }
    }

    /// Locks the queue state, recovering the data from a poisoned lock.
    ///
    /// No caller can observe partial state: every critical section either
    /// completes its update or performs none.
    fn locked(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues one item, suspending while the queue is at capacity.
    ///
    /// Fails with [`ErrorKind::QueueClosed`] once the queue has been
    /// closed; items are never silently dropped.
    pub async fn submit(&self, item: T) -> FlowResult<()> {
        let mut slot = Some(item);

        loop {
            let notified = self.space_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.locked();

                if inner.closed {
                    bail!(
                        ErrorKind::QueueClosed,
                        "work queue is closed and no longer accepts items"
                    );
                }

                if inner.items.len() < self.capacity
                    && let Some(item) = slot.take()
                {
                    inner.items.push_back(item);
                    drop(inner);

                    self.outstanding.send_modify(|count| *count += 1);
                    self.item_available.notify_one();

                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Dequeues the next item, suspending while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained, which is
    /// the signal for a worker to leave its consume loop.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.item_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.locked();

                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.space_available.notify_one();

                    return Some(item);
                }

                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks one previously popped item as completed, whatever its outcome.
    pub fn complete_one(&self) {
        self.outstanding
            .send_modify(|count| *count = count.saturating_sub(1));
    }

    /// Waits until every submitted item has been completed.
    ///
    /// The current count is inspected first, so joining an already drained
    /// queue returns immediately.
    pub async fn join(&self) {
        let mut outstanding = self.outstanding.subscribe();
        let _ = outstanding.wait_for(|count| *count == 0).await;
    }

    /// Discards all queued-but-unstarted items and returns how many were
    /// removed. In-flight items are unaffected.
    pub fn drain(&self) -> usize {
        let removed = {
            let mut inner = self.locked();
            let removed = inner.items.len();
            inner.items.clear();
            removed
        };

        if removed > 0 {
            self.outstanding
                .send_modify(|count| *count = count.saturating_sub(removed as u64));
            self.space_available.notify_waiters();
        }

        removed
    }

    /// Stops accepting new items and wakes every suspended producer and
    /// consumer. Already queued items remain poppable.
    pub fn close(&self) {
        {
            let mut inner = self.locked();
            inner.closed = true;
        }

        self.item_available.notify_waiters();
        self.space_available.notify_waiters();
    }

    /// Returns true once [`close`](WorkQueue::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.locked().closed
    }

    /// Number of queued-but-unstarted items.
    pub fn len(&self) -> usize {
        self.locked().items.len()
    }

    /// Returns true if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items submitted but not yet completed.
    pub fn outstanding(&self) -> u64 {
        *self.outstanding.borrow()
    }
}
