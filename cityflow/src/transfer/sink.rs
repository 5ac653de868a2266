use std::future::Future;

use crate::error::FlowResult;

/// Transactional boundary around the transfer output.
///
/// Workers write through their owned resources while the run is live; the
/// controller drives the sink exactly once at the end: [`commit`] when the
/// run completed, [`rollback`] best-effort after an abort. What commit and
/// rollback mean is up to the output side, closing a file atomically, ending
/// a store transaction, or nothing at all for targets without transactional
/// semantics.
///
/// [`commit`]: TransferSink::commit
/// [`rollback`]: TransferSink::rollback
pub trait TransferSink: Send + Sync + 'static {
    /// Makes the written output durable.
    ///
    /// A commit failure aborts the run; the caller must then treat the
    /// output as if the run had been interrupted.
    fn commit(&self) -> impl Future<Output = FlowResult<()>> + Send;

    /// Discards partially written output after an abort.
    ///
    /// Best effort: a rollback failure is logged by the controller and
    /// never masks the abort cause. Implementations must tolerate being
    /// called when nothing was written.
    fn rollback(&self) -> impl Future<Output = FlowResult<()>> + Send;
}
