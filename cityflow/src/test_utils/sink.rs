use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::bail;
use crate::error::{ErrorKind, FlowResult};
use crate::transfer::TransferSink;

/// In-memory transfer sink counting commits and rollbacks.
///
/// Either operation can be scripted to fail, which is how commit-failure and
/// rollback-failure paths are exercised. Clones share the counters.
#[derive(Clone, Default)]
pub struct MemorySink {
    commits: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
    fail_commit: Arc<AtomicBool>,
    fail_rollback: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every commit fail.
    pub fn failing_commit(self) -> Self {
        self.fail_commit.store(true, Ordering::Release);
        self
    }

    /// Makes every rollback fail.
    pub fn failing_rollback(self) -> Self {
        self.fail_rollback.store(true, Ordering::Release);
        self
    }

    /// Commits attempted so far, including failed ones.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }

    /// Rollbacks attempted so far, including failed ones.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Acquire)
    }
}

impl TransferSink for MemorySink {
    async fn commit(&self) -> FlowResult<()> {
        self.commits.fetch_add(1, Ordering::AcqRel);
        if self.fail_commit.load(Ordering::Acquire) {
            bail!(ErrorKind::StoreIoError, "scripted commit failure");
        }

        Ok(())
    }

    async fn rollback(&self) -> FlowResult<()> {
        self.rollbacks.fetch_add(1, Ordering::AcqRel);
        if self.fail_rollback.load(Ordering::Acquire) {
            bail!(ErrorKind::StoreIoError, "scripted rollback failure");
        }

        Ok(())
    }
}
