//! Audio-driven playback clock.
//!
//! The clock lives behind its own mutex so that readers (progress displays,
//! A/V sync) never contend with the pipeline mutex held by the decode loop.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use parking_lot::Mutex;
use std::time::Instant;

/// Snapshot of the playback clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockState {
    /// Media time in microseconds at `wall_time`.
    pub value: i64,
    /// When `value` was sampled. `None` until the first update.
    pub wall_time: Option<Instant>,
    /// Timeline generation the value belongs to.
    pub epoch: u32,
    /// Number of updates since creation.
    pub updates: u64,
}

impl ClockState {
    /// Media time at `now`, extrapolated from the last update.
    pub fn position_at(&self, now: Instant) -> Option<i64> {
        let wall_time = self.wall_time?;
        let elapsed = now.saturating_duration_since(wall_time).as_micros() as i64;
        Some(self.value + elapsed)
    }
}

/// Shared playback clock.
#[derive(Debug, Default)]
pub struct AudioClock {
    state: Mutex<ClockState>,
}

impl AudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that media time `pts + delay` is audible now.
    pub fn set_clock(&self, pts: i64, delay: i64, epoch: u32) {
        let mut state = self.state.lock();
        state.value = pts + delay;
        state.wall_time = Some(Instant::now());
        state.epoch = epoch;
        state.updates += 1;
    }

    /// Copy of the current clock state.
    pub fn snapshot(&self) -> ClockState {
        *self.state.lock()
    }

    /// Extrapolated media time, or `None` if the clock was never set or
    /// belongs to a different epoch than the caller expects.
    pub fn current_time(&self, epoch: u32) -> Option<i64> {
        let state = self.snapshot();
        if state.epoch != epoch {
            return None;
        }
        state.position_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unset_clock() {
        let clock = AudioClock::new();
        assert_eq!(clock.snapshot().updates, 0);
        assert_eq!(clock.current_time(0), None);
    }

    #[test]
    fn test_set_clock() {
        let clock = AudioClock::new();
        clock.set_clock(1_000, 250, 2);

        let state = clock.snapshot();
        assert_eq!(state.value, 1_250);
        assert_eq!(state.epoch, 2);
        assert_eq!(state.updates, 1);
        assert!(state.wall_time.is_some());
    }

    #[test]
    fn test_negative_delay() {
        let clock = AudioClock::new();
        clock.set_clock(1_000, -300, 0);
        assert_eq!(clock.snapshot().value, 700);
    }

    #[test]
    fn test_stale_epoch() {
        let clock = AudioClock::new();
        clock.set_clock(5_000, 0, 1);

        assert_eq!(clock.current_time(0), None);
        assert!(clock.current_time(1).unwrap() >= 5_000);
    }

    #[test]
    fn test_extrapolation() {
        let clock = AudioClock::new();
        clock.set_clock(0, 0, 0);

        let state = clock.snapshot();
        let later = state.wall_time.unwrap() + Duration::from_millis(20);
        assert_eq!(state.position_at(later), Some(20_000));
    }
}
