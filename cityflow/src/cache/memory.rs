use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use cityflow_config::shared::CacheConfig;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::bail;
use crate::cache::CacheStore;
use crate::error::{ErrorKind, FlowResult};
use crate::flow_error;
use crate::types::{DeferredReference, ObjectLocation};

/// Entries held in memory per partition before spilling to disk.
const DEFAULT_MAX_ENTRIES: usize = 65_536;

/// One line of a partition spill file.
#[derive(Debug, Serialize, Deserialize)]
struct SpillEntry {
    identifier: String,
    location: ObjectLocation,
}

/// One independently locked cache partition.
#[derive(Debug, Default)]
struct Shard {
    locations: HashMap<String, ObjectLocation>,
    deferred: HashMap<String, Vec<DeferredReference>>,
    /// Append-only JSON-lines file holding entries evicted from memory.
    spill_file: Option<PathBuf>,
}

/// Partitioned in-process cache store with local disk spill.
///
/// Identifiers are hashed onto independently locked partitions so workers
/// touching unrelated identifiers do not contend. When a partition exceeds
/// its in-memory budget, its location entries are appended to a JSON-lines
/// spill file under a per-run directory and dropped from memory; lookups
/// fall back to scanning that file. Deferred references always stay in
/// memory, they are bounded by the number of unresolved references rather
/// than by the object count.
///
/// The run directory is removed on [`teardown`](CacheStore::teardown).
#[derive(Debug, Clone)]
pub struct MemoryCacheStore {
    shards: Arc<Vec<Mutex<Shard>>>,
    max_entries_in_memory: usize,
    run_directory: Arc<PathBuf>,
}

impl MemoryCacheStore {
    /// Creates a store with the default partition count and in-memory
    /// budget, spilling under the OS temp directory.
    pub fn new() -> Self {
        Self::with_settings(CacheConfig::DEFAULT_PARTITIONS, DEFAULT_MAX_ENTRIES, None)
    }

    /// Creates a store with explicit partitioning, per-partition budget, and
    /// spill base directory.
    pub fn with_settings(
        partitions: u16,
        max_entries_in_memory: usize,
        spill_directory: Option<PathBuf>,
    ) -> Self {
        let partitions = partitions.max(1) as usize;
        let shards = (0..partitions).map(|_| Mutex::new(Shard::default())).collect();

        let base = spill_directory.unwrap_or_else(std::env::temp_dir);
        let run_directory = base.join(format!("cityflow-cache-{}", Uuid::new_v4().simple()));

        Self {
            shards: Arc::new(shards),
            max_entries_in_memory: max_entries_in_memory.max(1),
            run_directory: Arc::new(run_directory),
        }
    }

    fn shard_index(&self, identifier: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        identifier.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Scans a partition's spill file for the given identifier.
    ///
    /// The file is append-only and an identifier is spilled at most once, so
    /// the first match is authoritative.
    async fn find_spilled(
        &self,
        shard: &Shard,
        identifier: &str,
    ) -> FlowResult<Option<ObjectLocation>> {
        let Some(path) = &shard.spill_file else {
            return Ok(None);
        };

        let file = tokio::fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();

        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            let entry: SpillEntry = serde_json::from_str(&line).map_err(|err| {
                flow_error!(
                    ErrorKind::CacheStoreFailed,
                    "cache spill file is corrupted",
                    err
                )
            })?;
            if entry.identifier == identifier {
                return Ok(Some(entry.location));
            }
        }

        Ok(None)
    }

    /// Moves all in-memory location entries of a partition to its spill
    /// file.
    async fn spill_shard(&self, shard: &mut Shard, index: usize) -> FlowResult<()> {
        tokio::fs::create_dir_all(&*self.run_directory).await?;

        let path = shard
            .spill_file
            .clone()
            .unwrap_or_else(|| self.run_directory.join(format!("partition-{index}.jsonl")));

        let mut buffer = String::new();
        let spilled = shard.locations.len();
        for (identifier, location) in shard.locations.drain() {
            let line = serde_json::to_string(&SpillEntry {
                identifier,
                location,
            })
            .map_err(|err| {
                flow_error!(
                    ErrorKind::CacheStoreFailed,
                    "failed to encode cache spill entry",
                    err
                )
            })?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;

        shard.spill_file = Some(path);
        debug!(partition = index, spilled, "cache partition spilled to disk");

        Ok(())
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCacheStore {
    async fn prepare(&self) -> FlowResult<()> {
        if let Some(base) = self.run_directory.parent() {
            match tokio::fs::metadata(base).await {
                Ok(metadata) if !metadata.is_dir() => bail!(
                    ErrorKind::ConfigError,
                    "cache spill path is not a directory",
                    base.display()
                ),
                Ok(_) => {}
                Err(error) if error.kind() == IoErrorKind::NotFound => bail!(
                    ErrorKind::ConfigError,
                    "cache spill directory does not exist",
                    base.display()
                ),
                Err(error) => return Err(error.into()),
            }
        }

        // Creating the run directory up front surfaces a read-only base
        // before any worker spills.
        tokio::fs::create_dir_all(&*self.run_directory).await?;

        Ok(())
    }

    async fn put_location(
        &self,
        identifier: &str,
        location: ObjectLocation,
    ) -> FlowResult<Option<ObjectLocation>> {
        let index = self.shard_index(identifier);
        let mut shard = self.shards[index].lock().await;

        if let Some(existing) = shard.locations.get(identifier) {
            return Ok(Some(*existing));
        }
        if let Some(existing) = self.find_spilled(&shard, identifier).await? {
            return Ok(Some(existing));
        }

        if shard.locations.len() >= self.max_entries_in_memory {
            self.spill_shard(&mut shard, index).await?;
        }
        shard.locations.insert(identifier.to_string(), location);

        Ok(None)
    }

    async fn get_location(&self, identifier: &str) -> FlowResult<Option<ObjectLocation>> {
        let shard = self.shards[self.shard_index(identifier)].lock().await;

        if let Some(existing) = shard.locations.get(identifier) {
            return Ok(Some(*existing));
        }
        self.find_spilled(&shard, identifier).await
    }

    async fn push_deferred(&self, reference: DeferredReference) -> FlowResult<()> {
        let mut shard = self.shards[self.shard_index(&reference.target)].lock().await;

        shard
            .deferred
            .entry(reference.target.clone())
            .or_default()
            .push(reference);

        Ok(())
    }

    async fn take_deferred(&self, identifier: &str) -> FlowResult<Vec<DeferredReference>> {
        let mut shard = self.shards[self.shard_index(identifier)].lock().await;

        Ok(shard.deferred.remove(identifier).unwrap_or_default())
    }

    async fn drain_deferred(&self) -> FlowResult<Vec<DeferredReference>> {
        let mut drained = Vec::new();

        for shard in self.shards.iter() {
            let mut shard = shard.lock().await;
            for (_, mut references) in shard.deferred.drain() {
                drained.append(&mut references);
            }
        }

        Ok(drained)
    }

    async fn teardown(&self) -> FlowResult<()> {
        for shard in self.shards.iter() {
            let mut shard = shard.lock().await;
            shard.locations.clear();
            shard.deferred.clear();
            shard.spill_file = None;
        }

        match tokio::fs::remove_dir_all(&*self.run_directory).await {
            Ok(()) => {
                debug!(directory = %self.run_directory.display(), "removed cache spill directory");
                Ok(())
            }
            Err(error) if error.kind() == IoErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
