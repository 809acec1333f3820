//! Adaptive poll interval.

use std::time::Duration;

/// Poll interval that doubles while polls come back empty and snaps back to
/// the base interval as soon as there is work again.
///
/// Owned by the worker task; never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl PollSchedule {
    /// Creates a schedule starting at `base`, never exceeding
    /// `base * max_multiplier`.
    pub fn new(base: Duration, max_multiplier: u32) -> Self {
        let base = base.max(Duration::from_millis(1));
        let ceiling = base.saturating_mul(max_multiplier.max(1));
        Self {
            base,
            ceiling,
            current: base,
        }
    }

    /// Delay before the next poll.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Records an empty poll and returns the new, longer delay.
    pub fn on_empty(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        self.current
    }

    /// Records a poll that found work and returns the base delay.
    pub fn on_work(&mut self) -> Duration {
        self.current = self.base;
        self.current
    }
}
