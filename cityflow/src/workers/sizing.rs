use cityflow_config::shared::SizingMode;

/// Workers added per grow decision.
const GROW_STEP: u16 = 2;
/// Consecutive idle observations required before giving up a worker.
const IDLE_TICKS_BEFORE_SHRINK: u32 = 3;

/// Periodic sizing decision for the worker pool.
///
/// Consulted on the monitor tick, never per item. The aggressive mode grows
/// fast while the queue is backed up and shrinks slowly, one worker at a
/// time, only after the queue has stayed empty for several ticks. The fixed
/// mode never resizes.
#[derive(Debug)]
pub(crate) struct PoolSizer {
    mode: SizingMode,
    min_workers: u16,
    max_workers: u16,
    idle_ticks: u32,
}

impl PoolSizer {
    pub(crate) fn new(mode: SizingMode, min_workers: u16, max_workers: u16) -> Self {
        Self {
            mode,
            min_workers: min_workers.max(1),
            max_workers,
            idle_ticks: 0,
        }
    }

    /// Returns the new target worker count, if the pool should resize.
    pub(crate) fn evaluate(
        &mut self,
        queue_depth: usize,
        queue_capacity: usize,
        active_workers: u16,
    ) -> Option<u16> {
        if matches!(self.mode, SizingMode::Fixed) {
            return None;
        }

        let high_water = (queue_capacity / 2).max(1);

        if queue_depth >= high_water {
            self.idle_ticks = 0;

            if active_workers < self.max_workers {
                return Some(active_workers.saturating_add(GROW_STEP).min(self.max_workers));
            }

            return None;
        }

        if queue_depth == 0 {
            self.idle_ticks += 1;

            if self.idle_ticks >= IDLE_TICKS_BEFORE_SHRINK && active_workers > self.min_workers {
                self.idle_ticks = 0;
                return Some(active_workers - 1);
            }
        } else {
            self.idle_ticks = 0;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_fast_while_queue_is_backed_up() {
        let mut sizer = PoolSizer::new(SizingMode::Aggressive, 1, 8);

        assert_eq!(sizer.evaluate(10, 16, 1), Some(3));
        assert_eq!(sizer.evaluate(10, 16, 3), Some(5));
    }

    #[test]
    fn growth_is_capped_at_max_workers() {
        let mut sizer = PoolSizer::new(SizingMode::Aggressive, 1, 4);

        assert_eq!(sizer.evaluate(10, 16, 3), Some(4));
        assert_eq!(sizer.evaluate(10, 16, 4), None);
    }

    #[test]
    fn shrinks_one_worker_after_sustained_idle() {
        let mut sizer = PoolSizer::new(SizingMode::Aggressive, 1, 8);

        assert_eq!(sizer.evaluate(0, 16, 4), None);
        assert_eq!(sizer.evaluate(0, 16, 4), None);
        assert_eq!(sizer.evaluate(0, 16, 4), Some(3));
        // The idle streak starts over after a shrink.
        assert_eq!(sizer.evaluate(0, 16, 3), None);
    }

    #[test]
    fn a_busy_tick_resets_the_idle_streak() {
        let mut sizer = PoolSizer::new(SizingMode::Aggressive, 1, 8);

        assert_eq!(sizer.evaluate(0, 16, 4), None);
        assert_eq!(sizer.evaluate(0, 16, 4), None);
        assert_eq!(sizer.evaluate(3, 16, 4), None);
        assert_eq!(sizer.evaluate(0, 16, 4), None);
    }

    #[test]
    fn never_shrinks_below_min_workers() {
        let mut sizer = PoolSizer::new(SizingMode::Aggressive, 2, 8);

        for _ in 0..10 {
            assert_eq!(sizer.evaluate(0, 16, 2), None);
        }
    }

    #[test]
    fn fixed_mode_never_resizes() {
        let mut sizer = PoolSizer::new(SizingMode::Fixed, 1, 8);

        assert_eq!(sizer.evaluate(16, 16, 1), None);
        for _ in 0..10 {
            assert_eq!(sizer.evaluate(0, 16, 4), None);
        }
    }
}
