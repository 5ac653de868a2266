//! The consuming half of the engine, and the controller that owns a run.
//!
//! A [`worker::TransferWorker`] takes work items off the pool queue and
//! moves them through an [`codec::ItemCodec`] picked by feature kind, using
//! the store resource the worker owns. Identifier bookkeeping goes through
//! the cross-reference cache so forward references are parked and replayed
//! once their target lands. The [`controller::TransferController`] assembles
//! cache, pool, and splitter for one run, drives it to completion or abort,
//! settles the [`sink::TransferSink`], and reports the outcome.

pub mod codec;
pub mod controller;
pub mod report;
pub mod resource;
pub mod sink;
pub mod worker;

pub use codec::{CodecRegistry, ItemCodec, OutgoingReference, TransferOutput};
pub use controller::{ControllerState, InterruptHandle, TransferController};
pub use report::{TransferOutcome, TransferReport};
pub use resource::ResourceFactory;
pub use sink::TransferSink;
pub use worker::{TransferWorker, TransferWorkerFactory};
