use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Cross-reference cache configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Backing storage for the identifier mapping and deferred references.
    ///
    /// Default: in-memory with disk spill.
    #[serde(default)]
    pub backend: CacheBackend,

    /// Number of independent cache partitions.
    ///
    /// Sized to the expected worker concurrency so that workers touching
    /// unrelated identifiers do not contend on one lock.
    ///
    /// Default: 8
    #[serde(default = "default_partitions")]
    pub partitions: u16,

    /// Policy applied when two objects record the same identifier.
    ///
    /// Default: first write wins.
    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,
}

impl CacheConfig {
    /// Default partition count: 8.
    pub const DEFAULT_PARTITIONS: u16 = 8;

    /// Validates cache configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.partitions == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "partitions",
                constraint: "must be greater than zero",
            });
        }

        if let CacheBackend::Memory {
            max_entries_in_memory,
            ..
        } = &self.backend
            && *max_entries_in_memory == 0
        {
            return Err(ValidationError::InvalidFieldValue {
                field: "max_entries_in_memory",
                constraint: "must be greater than zero",
            });
        }

        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            partitions: Self::DEFAULT_PARTITIONS,
            on_duplicate: DuplicatePolicy::default(),
        }
    }
}

/// Where the cross-reference cache keeps its entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheBackend {
    /// Partitioned in-process tables that spill to local disk when a
    /// partition exceeds its in-memory budget.
    Memory {
        /// Directory for spill files. A uuid-named subdirectory is created
        /// per run and removed at teardown. Defaults to the OS temp dir.
        #[serde(default)]
        spill_directory: Option<PathBuf>,

        /// Entries held in memory per partition before spilling.
        ///
        /// Default: 65536
        #[serde(default = "default_max_entries_in_memory")]
        max_entries_in_memory: usize,
    },
    /// Scratch tables created inside the target database, for runs whose
    /// identifier volume exceeds local memory and disk budgets.
    Database,
}

impl Default for CacheBackend {
    fn default() -> Self {
        Self::Memory {
            spill_directory: None,
            max_entries_in_memory: default_max_entries_in_memory(),
        }
    }
}

/// Policy for `record` calls that hit an identifier already mapped to a
/// different location.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first recorded location, report the duplicate to the caller.
    FirstWins,
    /// Fail the recording call with a duplicate-identifier error.
    Reject,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self::FirstWins
    }
}

fn default_partitions() -> u16 {
    CacheConfig::DEFAULT_PARTITIONS
}

fn default_max_entries_in_memory() -> usize {
    65_536
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backend_is_memory_with_spill() {
        let config = CacheConfig::default();

        assert!(config.validate().is_ok());
        assert!(matches!(
            config.backend,
            CacheBackend::Memory {
                spill_directory: None,
                ..
            }
        ));
        assert_eq!(config.on_duplicate, DuplicatePolicy::FirstWins);
    }

    #[test]
    fn rejects_zero_partitions() {
        let config = CacheConfig {
            partitions: 0,
            ..CacheConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_database_backend() {
        let config: CacheConfig =
            serde_json::from_str(r#"{ "backend": { "type": "database" } }"#).unwrap();

        assert!(matches!(config.backend, CacheBackend::Database));
    }
}
