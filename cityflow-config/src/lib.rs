//! Configuration types for cityflow transfer runs.
//!
//! The types in [`shared`] describe one transfer run end to end: store
//! connection, worker pool sizing, cross-reference cache backing, and the
//! discovery filters. [`load_config`] assembles them from layered
//! configuration files plus environment overrides.

pub mod environment;
mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config};
