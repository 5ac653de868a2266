//! Graceful shutdown signaling for transfer tasks.
//!
//! Wraps a tokio watch channel into a broadcast shutdown signal: one sender
//! held by the controller, any number of receivers held by the splitter and
//! stream adapters. The signal carries no payload; the interrupt latch holds
//! the cause.

use tokio::sync::watch;

/// Receiver side of the shutdown channel.
///
/// Receivers observe the signal either by awaiting `changed()` or by
/// polling `has_changed()` inside stream adapters.
pub type ShutdownRx = watch::Receiver<()>;

/// Transmitter side of the shutdown channel.
///
/// Cloneable so several components can request shutdown; all receivers
/// observe the first signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Creates a new receiver observing signals sent after this call.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }

    /// Broadcasts the shutdown signal to all current receivers.
    ///
    /// Fails only when every receiver has already been dropped, in which
    /// case there is nothing left to stop.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }
}

/// Creates a connected shutdown channel pair.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}

/// Outcome of an operation that can be cut short by shutdown.
///
/// `Ok` carries the operation's result; `Shutdown` carries whatever partial
/// state the operation wants to hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult<T, S> {
    Ok(T),
    Shutdown(S),
}
