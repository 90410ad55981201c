//! Logical sample clock.
//!
//! The renderer advances the counter once per emitted sample. The scheduler
//! copies it into the snapshot once per control step, before any module runs,
//! so every module of every voice in that step reads the same tick while the
//! counter keeps moving underneath.

use std::sync::atomic::{AtomicU32, Ordering};

use flux_core::Tick;

#[derive(Debug, Default)]
pub struct TickClock {
    /// Samples emitted so far. Wraps silently.
    counter: AtomicU32,
    /// Counter value captured at the start of the current control step.
    snapshot: AtomicU32,
}

impl TickClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A clock whose counter starts at `tick`.
    pub fn starting_at(tick: Tick) -> Self {
        Self {
            counter: AtomicU32::new(tick),
            snapshot: AtomicU32::new(tick),
        }
    }

    /// Count one emitted sample. Renderer thread only.
    #[inline(always)]
    pub fn advance(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture the counter for the control step about to run; returns it.
    pub fn snapshot(&self) -> Tick {
        let tick = self.counter.load(Ordering::Relaxed);
        self.snapshot.store(tick, Ordering::Release);
        tick
    }

    /// The last snapshot. Safe from any thread.
    #[inline(always)]
    pub fn read(&self) -> Tick {
        self.snapshot.load(Ordering::Acquire)
    }

    /// The live counter, for diagnostics.
    pub fn raw(&self) -> Tick {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_stable_while_counter_moves() {
        let clock = TickClock::new();
        clock.advance();
        clock.advance();
        assert_eq!(clock.snapshot(), 2);

        clock.advance();
        assert_eq!(clock.read(), 2);
        assert_eq!(clock.raw(), 3);
    }

    #[test]
    fn test_counter_wraps() {
        let clock = TickClock::starting_at(Tick::MAX);
        clock.advance();
        assert_eq!(clock.raw(), 0);
        assert_eq!(clock.snapshot(), 0);
    }
}
