//! Producer/consumer transfer engine for graph-structured geographic
//! feature data.
//!
//! The engine streams features between a spatial store and file-based
//! exchange formats through a bounded pipeline: a [`splitter::Splitter`]
//! discovers work items and feeds a [`workers::WorkerPool`], workers convert
//! items through caller-supplied codecs while recording and resolving
//! cross-references in a [`cache::CrossReferenceCache`], and a
//! [`transfer::TransferController`] owns the run lifecycle, counter
//! aggregation, and abort handling. Interrupts travel on the
//! [`events::EventBus`] so every component observes one abort decision.

pub mod cache;
pub mod concurrency;
pub mod error;
pub mod events;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod splitter;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transfer;
pub mod types;
pub mod workers;
