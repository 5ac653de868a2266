//! Synchronous in-process event bus used for cross-worker coordination.
//!
//! Three event kinds are structural to the engine: [`InterruptEvent`] aborts
//! a run through a single-set latch, [`CounterEvent`] merges per-worker
//! counters additively, and [`ProgressEvent`] reports completed work to the
//! embedding front end. Delivery is synchronous on the publisher's task, in
//! subscription order.

mod bus;
mod interrupt;
mod types;

pub use bus::*;
pub use interrupt::*;
pub use types::*;
