//! Generic bounded worker pool executing transfer work items.
//!
//! The pool couples a bounded [`queue::WorkQueue`] with a set of worker
//! tasks, each owning one store resource created through a
//! [`base::WorkerFactory`]. A periodic monitor resizes the pool within its
//! configured bounds, and the [`policy`] module decides whether a worker
//! failure skips an item, retires the worker, or aborts the whole run.

pub mod base;
pub mod policy;
pub mod pool;
pub mod queue;
pub mod sizing;

pub use base::{PoolWorker, WorkerFactory};
pub use policy::{FailureAction, classify_failure};
pub use pool::{PoolState, WorkerPool};
pub use queue::WorkQueue;
