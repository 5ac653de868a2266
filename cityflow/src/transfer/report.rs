use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::events::{CounterEvent, InterruptCause};
use crate::splitter::DiscoverySummary;
use crate::types::DeferredReference;

/// Terminal outcome of one transfer run.
///
/// The outcome alone distinguishes success from abort; fatal failures
/// inside a run end up here rather than as bare errors, so an embedding
/// caller always gets counters and unresolved references to report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Discovery finished and every submitted item was consumed.
    Completed,
    /// The run was interrupted. Partially written output has been rolled
    /// back best-effort and must not be trusted.
    Aborted {
        /// What tripped the interrupt latch.
        cause: InterruptCause,
        /// Message of the winning interrupt.
        message: String,
    },
}

/// End-of-run report handed back to the embedding caller.
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Whether the run completed or was aborted.
    pub outcome: TransferOutcome,
    /// Per-kind processed counts plus failure and duplicate totals, merged
    /// from all workers.
    pub counters: CounterEvent,
    /// What discovery scanned and submitted. Partial on aborted runs.
    pub discovery: DiscoverySummary,
    /// References whose target identifier never arrived during the run.
    pub unresolved: Vec<DeferredReference>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time from start to report.
    pub duration: Duration,
}

impl TransferReport {
    /// Whether the run completed without an interrupt.
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Completed)
    }
}
