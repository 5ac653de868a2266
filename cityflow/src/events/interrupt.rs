use std::sync::OnceLock;

use crate::events::InterruptEvent;

/// Single-set latch recording the first interrupt of a run.
///
/// Every loop in the engine checks [`is_tripped`](InterruptLatch::is_tripped)
/// before starting its next unit of work, so at most one further unit per
/// task completes after an interrupt is requested. The latch is never reset
/// within one run; a new run builds a new latch.
#[derive(Debug, Default)]
pub struct InterruptLatch {
    state: OnceLock<InterruptEvent>,
}

impl InterruptLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to trip the latch with the given interrupt.
    ///
    /// Returns true if this call won the race and the stored interrupt is
    /// `event`; returns false if the latch was already tripped, in which
    /// case `event` is discarded.
    pub fn trip(&self, event: InterruptEvent) -> bool {
        self.state.set(event).is_ok()
    }

    /// Returns true once any interrupt has been recorded.
    pub fn is_tripped(&self) -> bool {
        self.state.get().is_some()
    }

    /// Returns the winning interrupt, if the latch has been tripped.
    pub fn cause(&self) -> Option<&InterruptEvent> {
        self.state.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSeverity, InterruptCause};

    #[test]
    fn first_trip_wins() {
        let latch = InterruptLatch::new();
        assert!(!latch.is_tripped());

        let won = latch.trip(InterruptEvent::new(
            InterruptCause::UserRequested,
            "stop requested",
            EventSeverity::Info,
        ));
        assert!(won);

        let lost = latch.trip(InterruptEvent::fatal("discovery failed"));
        assert!(!lost);

        let stored = latch.cause().unwrap();
        assert_eq!(stored.cause, InterruptCause::UserRequested);
        assert_eq!(stored.message, "stop requested");
    }

    #[test]
    fn concurrent_trips_record_exactly_one_winner() {
        let latch = std::sync::Arc::new(InterruptLatch::new());

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let latch = latch.clone();
                std::thread::spawn(move || {
                    latch.trip(InterruptEvent::fatal(format!("worker {index} failed")))
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(false))
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(latch.is_tripped());
    }
}
