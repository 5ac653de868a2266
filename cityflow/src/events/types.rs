use std::collections::BTreeMap;
use std::fmt;

use crate::types::FeatureKind;

/// Why a run was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum InterruptCause {
    /// The embedding front end asked for cancellation.
    UserRequested,
    /// A component hit a failure the run cannot recover from.
    FatalError,
    /// Every worker retired while items were still outstanding.
    WorkersExhausted,
}

impl fmt::Display for InterruptCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "user requested"),
            Self::FatalError => write!(f, "fatal error"),
            Self::WorkersExhausted => write!(f, "workers exhausted"),
        }
    }
}

/// Log level the controller reports an interrupt at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSeverity {
    Info,
    Warn,
    Error,
}

/// Requests cooperative cancellation of the running transfer.
///
/// The first [`InterruptEvent`] published wins the latch; later publications
/// are delivered to subscribers but change nothing. The winning event's cause
/// and message end up in the final [`TransferReport`](crate::transfer::TransferReport).
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptEvent {
    pub cause: InterruptCause,
    pub message: String,
    pub severity: EventSeverity,
}

impl InterruptEvent {
    pub fn new(cause: InterruptCause, message: impl Into<String>, severity: EventSeverity) -> Self {
        Self {
            cause,
            message: message.into(),
            severity,
        }
    }

    /// Shorthand for a fatal interrupt reported at error level.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(InterruptCause::FatalError, message, EventSeverity::Error)
    }
}

/// Per-worker counters published once when a worker retires.
///
/// Counts are merged additively by the controller, so workers never share a
/// mutable counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterEvent {
    /// Successfully processed items per feature kind.
    pub processed: BTreeMap<FeatureKind, u64>,
    /// Items that failed to convert or write and were skipped.
    pub failed: u64,
    /// Items skipped because their identifier was already transferred.
    pub skipped_duplicates: u64,
}

impl CounterEvent {
    /// Merges another counter snapshot into this one.
    pub fn merge(&mut self, other: &CounterEvent) {
        for (kind, count) in &other.processed {
            *self.processed.entry(*kind).or_default() += count;
        }
        self.failed += other.failed;
        self.skipped_duplicates += other.skipped_duplicates;
    }

    /// Total processed items across all kinds.
    pub fn total_processed(&self) -> u64 {
        self.processed.values().sum()
    }
}

/// Completed-work delta emitted after each processed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Number of items completed since the previous progress event from the
    /// same worker.
    pub completed: u64,
}

/// Classification of bus events without their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Interrupt,
    ObjectCounter,
    Progress,
}

/// One event flowing over the [`EventBus`](crate::events::EventBus).
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    Interrupt(InterruptEvent),
    ObjectCounter(CounterEvent),
    Progress(ProgressEvent),
}

impl FlowEvent {
    /// Returns the [`EventKind`] that corresponds to this event.
    pub fn kind(&self) -> EventKind {
        match self {
            FlowEvent::Interrupt(_) => EventKind::Interrupt,
            FlowEvent::ObjectCounter(_) => EventKind::ObjectCounter,
            FlowEvent::Progress(_) => EventKind::Progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_merge_is_additive() {
        let mut left = CounterEvent::default();
        left.processed.insert(FeatureKind::Building, 2);
        left.failed = 1;

        let mut right = CounterEvent::default();
        right.processed.insert(FeatureKind::Building, 3);
        right.processed.insert(FeatureKind::LandUse, 1);
        right.skipped_duplicates = 4;

        left.merge(&right);

        assert_eq!(left.processed.get(&FeatureKind::Building), Some(&5));
        assert_eq!(left.processed.get(&FeatureKind::LandUse), Some(&1));
        assert_eq!(left.failed, 1);
        assert_eq!(left.skipped_duplicates, 4);
        assert_eq!(left.total_processed(), 6);
    }

    #[test]
    fn event_kind_matches_payload() {
        let event = FlowEvent::Progress(ProgressEvent { completed: 1 });
        assert_eq!(event.kind(), EventKind::Progress);
    }
}
