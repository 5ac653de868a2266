//! Cross-reference cache shared by all transfer workers.
//!
//! During a transfer, objects are written in arbitrary order across workers,
//! so a reference to another object may be encountered before its target has
//! been assigned a location in the output. The [`CrossReferenceCache`] keeps
//! the identifier-to-location mapping and parks references to identifiers
//! that are still unknown, replaying them the moment the target is recorded.
//!
//! Backing storage is pluggable through [`CacheStore`]: partitioned
//! in-process tables that spill to local disk, or scratch tables inside the
//! target database when several processes share one run.

mod base;
mod memory;
mod postgres;
mod xref;

pub use base::CacheStore;
pub use memory::MemoryCacheStore;
pub use postgres::PostgresCacheStore;
pub use xref::{CrossReferenceCache, DeferOutcome, RecordOutcome};
