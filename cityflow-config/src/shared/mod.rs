//! Shared configuration types for cityflow transfer runs.

mod base;
mod cache;
mod connection;
mod filter;
mod pool;
mod transfer;

pub use base::ValidationError;
pub use cache::{CacheBackend, CacheConfig, DuplicatePolicy};
pub use connection::{
    CITYFLOW_CACHE_OPTIONS, CITYFLOW_SCAN_OPTIONS, CITYFLOW_WORKER_OPTIONS, IntoConnectOptions,
    SessionOptions, StoreConnectionConfig, StoreConnectionConfigWithoutSecrets, TlsConfig,
};
pub use filter::{
    BoundingBox, BoundingBoxFilterConfig, FilterConfig, NameFilterConfig, RangeFilterConfig,
    SpatialMode,
};
pub use pool::{PoolConfig, SizingMode};
pub use transfer::{TransferConfig, TransferConfigWithoutSecrets};
