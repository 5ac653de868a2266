use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    CacheConfig, PoolConfig, StoreConnectionConfig, StoreConnectionConfigWithoutSecrets,
    ValidationError,
};

/// Configuration for one transfer run.
///
/// Contains everything the engine needs that is not supplied per call:
/// store connection, pool sizing, and cache backing. The discovery query and
/// filters are passed to the controller at run time.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Clone, Debug, Deserialize)]
pub struct TransferConfig {
    /// Unique identifier of this transfer run.
    ///
    /// Isolates concurrent runs from each other in logs and in the scratch
    /// area of the database-backed cache.
    pub id: u64,

    /// Optional named workspace (snapshot) in the source store.
    ///
    /// Passed through opaquely to the discovery and codec layers.
    #[serde(default)]
    pub workspace: Option<String>,

    /// Connection settings for the spatial store.
    pub connection: StoreConnectionConfig,

    /// Worker pool sizing and queueing.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Cross-reference cache backing.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl TransferConfig {
    /// Validates all nested configuration sections.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()?;
        self.pool.validate()?;
        self.cache.validate()?;

        Ok(())
    }
}

impl Config for TransferConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// Same as [`TransferConfig`] but without secrets. This type implements
/// [`Serialize`] because it does not contain secrets so is safe to serialize.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfigWithoutSecrets {
    /// Unique identifier of this transfer run.
    pub id: u64,

    /// Optional named workspace (snapshot) in the source store.
    #[serde(default)]
    pub workspace: Option<String>,

    /// Connection settings for the spatial store.
    pub connection: StoreConnectionConfigWithoutSecrets,

    /// Worker pool sizing and queueing.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Cross-reference cache backing.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl From<TransferConfig> for TransferConfigWithoutSecrets {
    fn from(value: TransferConfig) -> Self {
        TransferConfigWithoutSecrets {
            id: value.id,
            workspace: value.workspace,
            connection: value.connection.into(),
            pool: value.pool,
            cache: value.cache,
        }
    }
}
