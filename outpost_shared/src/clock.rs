//! Tick sources.
//!
//! The server reads `now()` but never advances it.

use std::time::{Duration, Instant};

/// Monotonic, read-only tick counter.
pub trait Clock {
    fn now(&self) -> u64;
}

/// Manually driven clock for tests. Starts at 0.
#[derive(Debug, Default, Clone)]
pub struct FakeClock {
    now: u64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward. Never goes backwards.
    pub fn advance(&mut self, ticks: u64) {
        self.now = self.now.saturating_add(ticks);
    }

    /// Jumps to `tick` if it is not in the past.
    pub fn set(&mut self, tick: u64) {
        self.now = self.now.max(tick);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.now
    }
}

/// Wall-clock ticks elapsed since creation at a fixed rate.
#[derive(Debug, Clone)]
pub struct TickClock {
    start: Instant,
    tick: Duration,
}

impl TickClock {
    pub fn new(tick_hz: u32) -> Self {
        Self {
            start: Instant::now(),
            tick: Duration::from_secs_f64(1.0 / f64::from(tick_hz.max(1))),
        }
    }

    /// Length of one tick.
    pub fn tick_duration(&self) -> Duration {
        self.tick
    }
}

impl Clock for TickClock {
    fn now(&self) -> u64 {
        (self.start.elapsed().as_nanos() / self.tick.as_nanos().max(1)) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_starts_at_zero_and_is_monotonic() {
        let mut c = FakeClock::new();
        assert_eq!(c.now(), 0);
        c.advance(5);
        c.set(3);
        assert_eq!(c.now(), 5);
        c.set(9);
        assert_eq!(c.now(), 9);
    }

    #[test]
    fn tick_clock_starts_near_zero() {
        let c = TickClock::new(64);
        assert!(c.now() <= 1);
        assert_eq!(c.tick_duration(), Duration::from_secs_f64(1.0 / 64.0));
    }

    #[test]
    fn tick_clock_zero_hz_is_clamped() {
        let c = TickClock::new(0);
        assert_eq!(c.tick_duration(), Duration::from_secs(1));
    }
}
