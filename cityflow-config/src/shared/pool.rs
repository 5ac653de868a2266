use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Worker pool sizing and queueing configuration.
///
/// The pool prestarts `min_workers` and may grow toward `max_workers` when
/// the [`SizingMode`] allows it. The work queue is bounded at
/// `queue_capacity`; submitters are suspended while it is full.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Number of workers created before any work is accepted.
    ///
    /// Default: 1
    #[serde(default = "default_min_workers")]
    pub min_workers: u16,

    /// Upper bound on concurrently running workers.
    ///
    /// Default: 4
    #[serde(default = "default_max_workers")]
    pub max_workers: u16,

    /// Capacity of the bounded work queue.
    ///
    /// Default: 8
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How the pool adapts its size between `min_workers` and `max_workers`.
    ///
    /// Default: aggressive
    #[serde(default)]
    pub sizing: SizingMode,

    /// Interval in milliseconds between sizing decisions.
    ///
    /// Default: 500
    #[serde(default = "default_sizing_interval_ms")]
    pub sizing_interval_ms: u64,
}

impl PoolConfig {
    /// Default minimum pool size: 1 worker.
    pub const DEFAULT_MIN_WORKERS: u16 = 1;

    /// Default maximum pool size: 4 workers.
    pub const DEFAULT_MAX_WORKERS: u16 = 4;

    /// Default work queue capacity: 8 items.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

    /// Default sizing interval: 500ms.
    pub const DEFAULT_SIZING_INTERVAL_MS: u64 = 500;

    /// Validates pool sizing constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_workers == 0 {
            return Err(ValidationError::MaxWorkersZero);
        }

        if self.min_workers > self.max_workers {
            return Err(ValidationError::WorkerRangeInverted);
        }

        if self.queue_capacity == 0 {
            return Err(ValidationError::QueueCapacityZero);
        }

        if self.sizing_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "sizing_interval_ms",
                constraint: "must be greater than zero",
            });
        }

        Ok(())
    }

    /// A single-worker profile for operations where concurrent writers could
    /// deadlock the store, such as deleting groups together with their members.
    pub fn single_worker(&self) -> Self {
        Self {
            min_workers: 1,
            max_workers: 1,
            queue_capacity: self.queue_capacity,
            sizing: SizingMode::Fixed,
            sizing_interval_ms: self.sizing_interval_ms,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: Self::DEFAULT_MIN_WORKERS,
            max_workers: Self::DEFAULT_MAX_WORKERS,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            sizing: SizingMode::default(),
            sizing_interval_ms: Self::DEFAULT_SIZING_INTERVAL_MS,
        }
    }
}

/// Strategy for adapting the pool size at runtime.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// Grow quickly while the queue backs up, shrink slowly once it drains.
    Aggressive,
    /// Keep exactly `min_workers` for the whole run.
    Fixed,
}

impl Default for SizingMode {
    fn default() -> Self {
        Self::Aggressive
    }
}

fn default_min_workers() -> u16 {
    PoolConfig::DEFAULT_MIN_WORKERS
}

fn default_max_workers() -> u16 {
    PoolConfig::DEFAULT_MAX_WORKERS
}

fn default_queue_capacity() -> usize {
    PoolConfig::DEFAULT_QUEUE_CAPACITY
}

fn default_sizing_interval_ms() -> u64 {
    PoolConfig::DEFAULT_SIZING_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PoolConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn rejects_inverted_worker_range() {
        let config = PoolConfig {
            min_workers: 8,
            max_workers: 4,
            ..PoolConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::WorkerRangeInverted)
        ));
    }

    #[test]
    fn single_worker_profile_is_fixed() {
        let profile = PoolConfig::default().single_worker();

        assert_eq!(profile.min_workers, 1);
        assert_eq!(profile.max_workers, 1);
        assert_eq!(profile.sizing, SizingMode::Fixed);
        assert!(profile.validate().is_ok());
    }
}
