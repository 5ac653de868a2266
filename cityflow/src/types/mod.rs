//! Common types used throughout the transfer engine.
//!
//! Re-exports feature identities, work items, cross-reference links, and
//! query types shared by the splitter, the worker pool, and the cache.

mod feature;
mod item;
mod link;
mod query;

pub use feature::*;
pub use item::*;
pub use link::*;
pub use query::*;

// Re-exports.
pub use cityflow_config::shared::BoundingBox;
