use std::time::Duration;

use cityflow_config::shared::{
    CITYFLOW_CACHE_OPTIONS, IntoConnectOptions, StoreConnectionConfig,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::error::{ErrorKind, FlowResult};
use crate::flow_error;
use crate::types::{DeferredReference, FeatureKey, FeatureKind, ObjectLocation, ReferencePatch};

/// Maximum number of connections in the cache pool.
///
/// Cache statements are short keyed reads and writes issued from many
/// workers; two connections keep them from queueing behind one session
/// without holding a connection per worker.
const MAX_POOL_CONNECTIONS: u32 = 2;

/// Duration after which idle cache connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool for the scratch cache tables.
///
/// No connection is established until the first statement runs, and idle
/// connections are closed automatically, so a run whose cache never leaves
/// memory pays nothing here.
fn create_cache_pool(config: &StoreConnectionConfig) -> PgPool {
    let options = config.with_db(Some(&CITYFLOW_CACHE_OPTIONS));

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(MAX_POOL_CONNECTIONS)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options)
}

/// Cache store backed by scratch tables inside the target database.
///
/// Used when the identifier volume of a run exceeds local memory and disk
/// budgets, or when several processes must share one cross-reference space.
/// Each store instance owns a pair of uniquely named unlogged tables; the
/// database enforces the per-identifier atomicity that the in-process store
/// gets from its partition locks.
///
/// The scratch tables are dropped on [`teardown`](CacheStore::teardown)
/// regardless of the transfer outcome.
#[derive(Debug, Clone)]
pub struct PostgresCacheStore {
    pool: PgPool,
    locations_table: String,
    deferred_table: String,
}

impl PostgresCacheStore {
    /// Creates a store for one run against the given connection settings.
    ///
    /// The scratch tables do not exist until [`prepare`](CacheStore::prepare)
    /// is called.
    pub fn new(connection: &StoreConnectionConfig) -> Self {
        let run_id = Uuid::new_v4().simple().to_string();

        Self {
            pool: create_cache_pool(connection),
            locations_table: format!("cityflow_cache_locations_{run_id}"),
            deferred_table: format!("cityflow_cache_deferred_{run_id}"),
        }
    }

    fn decode_location(row: &PgRow) -> FlowResult<ObjectLocation> {
        let key: i64 = row.get("feature_key");
        let kind_id: i32 = row.get("kind_id");
        let kind = FeatureKind::from_type_id(kind_id).ok_or_else(|| {
            flow_error!(
                ErrorKind::InvalidData,
                "cache row holds an unknown feature kind",
                format!("kind id {kind_id} for feature key {key}")
            )
        })?;

        Ok(ObjectLocation {
            key: FeatureKey(key),
            kind,
        })
    }

    fn decode_deferred(row: &PgRow) -> FlowResult<DeferredReference> {
        let from_key: i64 = row.get("from_key");
        let from_kind: i32 = row.get("from_kind");
        let kind = FeatureKind::from_type_id(from_kind).ok_or_else(|| {
            flow_error!(
                ErrorKind::InvalidData,
                "cache row holds an unknown feature kind",
                format!("kind id {from_kind} for feature key {from_key}")
            )
        })?;

        Ok(DeferredReference {
            from: ObjectLocation {
                key: FeatureKey(from_key),
                kind,
            },
            target: row.get("target"),
            patch: ReferencePatch {
                attribute: row.get("attribute"),
            },
        })
    }
}

impl CacheStore for PostgresCacheStore {
    /// Creates the scratch tables for this run.
    async fn prepare(&self) -> FlowResult<()> {
        debug!(
            locations = %self.locations_table,
            deferred = %self.deferred_table,
            "creating scratch cache tables"
        );

        sqlx::query(&format!(
            r#"
            CREATE UNLOGGED TABLE IF NOT EXISTS {} (
                identifier TEXT PRIMARY KEY,
                feature_key BIGINT NOT NULL,
                kind_id INTEGER NOT NULL
            )
            "#,
            self.locations_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE UNLOGGED TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                target TEXT NOT NULL,
                from_key BIGINT NOT NULL,
                from_kind INTEGER NOT NULL,
                attribute TEXT NOT NULL
            )
            "#,
            self.deferred_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {}_target_idx ON {} (target)",
            self.deferred_table, self.deferred_table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put_location(
        &self,
        identifier: &str,
        location: ObjectLocation,
    ) -> FlowResult<Option<ObjectLocation>> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO {} (identifier, feature_key, kind_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (identifier) DO NOTHING
            "#,
            self.locations_table
        ))
        .bind(identifier)
        .bind(location.key.as_i64())
        .bind(location.kind.type_id())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(None);
        }

        // Lost the race; the winning row is committed and visible.
        let row = sqlx::query(&format!(
            "SELECT feature_key, kind_id FROM {} WHERE identifier = $1",
            self.locations_table
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            flow_error!(
                ErrorKind::CacheStoreFailed,
                "identifier mapping disappeared from the scratch table",
                identifier
            )
        })?;

        Self::decode_location(&row).map(Some)
    }

    async fn get_location(&self, identifier: &str) -> FlowResult<Option<ObjectLocation>> {
        let row = sqlx::query(&format!(
            "SELECT feature_key, kind_id FROM {} WHERE identifier = $1",
            self.locations_table
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode_location).transpose()
    }

    async fn push_deferred(&self, reference: DeferredReference) -> FlowResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (target, from_key, from_kind, attribute)
            VALUES ($1, $2, $3, $4)
            "#,
            self.deferred_table
        ))
        .bind(&reference.target)
        .bind(reference.from.key.as_i64())
        .bind(reference.from.kind.type_id())
        .bind(&reference.patch.attribute)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take_deferred(&self, identifier: &str) -> FlowResult<Vec<DeferredReference>> {
        let rows = sqlx::query(&format!(
            r#"
            DELETE FROM {}
            WHERE target = $1
            RETURNING target, from_key, from_kind, attribute
            "#,
            self.deferred_table
        ))
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode_deferred).collect()
    }

    async fn drain_deferred(&self) -> FlowResult<Vec<DeferredReference>> {
        let rows = sqlx::query(&format!(
            "DELETE FROM {} RETURNING target, from_key, from_kind, attribute",
            self.deferred_table
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode_deferred).collect()
    }

    /// Drops the scratch tables and closes the pool.
    async fn teardown(&self) -> FlowResult<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.deferred_table))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.locations_table))
            .execute(&self.pool)
            .await?;

        self.pool.close().await;
        info!(
            locations = %self.locations_table,
            deferred = %self.deferred_table,
            "dropped scratch cache tables"
        );

        Ok(())
    }
}
