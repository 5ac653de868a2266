use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The worker pool must be allowed at least one worker.
    #[error("`max_workers` cannot be zero")]
    MaxWorkersZero,
    /// The minimum pool size cannot exceed the maximum.
    #[error("`min_workers` cannot exceed `max_workers`")]
    WorkerRangeInverted,
    /// A zero-capacity work queue would deadlock submitters.
    #[error("`queue_capacity` cannot be zero")]
    QueueCapacityZero,
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A field value violates a documented constraint.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: &'static str,
        constraint: &'static str,
    },
}
