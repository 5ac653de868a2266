//! Discovery-and-dispatch side of the transfer pipeline.
//!
//! The [`Splitter`] scans the source through the [`FeatureDiscovery`] seam,
//! evaluates each row against the configured [`FilterChain`], and submits
//! accepted rows to the worker pool. Group features take a separate path: a
//! post-order traversal of the membership graph, with pool rendezvous points
//! guaranteeing members are processed before the groups that reference them.

mod discovery;
mod driver;
mod filters;

pub use discovery::FeatureDiscovery;
pub use driver::{DiscoverySummary, Splitter};
pub use filters::{FilterChain, FilterDecision};
