use crate::error::{ErrorKind, FlowError};

/// How a worker failure affects the running transfer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailureAction {
    /// The current item is logged, counted as failed, and skipped; the
    /// transfer continues.
    SkipItem,
    /// The worker's owned resource is unusable; the worker retires and the
    /// pool shrinks. The transfer continues while at least one worker
    /// remains.
    RetireWorker,
    /// The whole transfer must stop through the interrupt latch.
    Abort,
}

/// Classifies a [`FlowError`] into the action workers and the pool take.
///
/// Item-scoped failures never stop the pipeline, resource failures cost one
/// worker, and everything else aborts the run. Aggregated errors are
/// classified by their most severe member.
pub fn classify_failure(error: &FlowError) -> FailureAction {
    let mut action = FailureAction::SkipItem;
    for kind in error.kinds() {
        let next = classify_kind(kind);
        if next == FailureAction::Abort {
            return FailureAction::Abort;
        }
        if next == FailureAction::RetireWorker {
            action = FailureAction::RetireWorker;
        }
    }
    action
}

fn classify_kind(kind: ErrorKind) -> FailureAction {
    match kind {
        // One item failed to convert or write. The item is skipped and
        // counted; the transfer continues.
        ErrorKind::ItemConversionFailed
        | ErrorKind::ItemWriteFailed
        | ErrorKind::InvalidData
        | ErrorKind::SerializationError
        | ErrorKind::DeserializationError
        | ErrorKind::DuplicateIdentifier => FailureAction::SkipItem,

        // The worker's owned connection is gone. Retire the worker, keep
        // the transfer alive on the remaining ones.
        ErrorKind::StoreConnectionFailed
        | ErrorKind::AuthenticationFailed
        | ErrorKind::StoreIoError
        | ErrorKind::ResourceUnavailable => FailureAction::RetireWorker,

        // Special handling for fault injection tests.
        #[cfg(feature = "failpoints")]
        ErrorKind::WithSkipItem => FailureAction::SkipItem,
        #[cfg(feature = "failpoints")]
        ErrorKind::WithRetireWorker => FailureAction::RetireWorker,
        #[cfg(feature = "failpoints")]
        ErrorKind::WithAbort => FailureAction::Abort,

        // Discovery, cache, and state failures compromise the whole run.
        _ => FailureAction::Abort,
    }
}
