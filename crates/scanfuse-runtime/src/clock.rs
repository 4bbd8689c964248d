//! Time sources for the acquisition loop.
//!
//! Two timelines are kept apart: wall-clock milliseconds since the Unix
//! epoch stamp outgoing messages, while intervals (heartbeat, object ageing)
//! are measured on a monotonic millisecond counter that a wall-clock
//! correction cannot move backwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;

/// Both readings of "now", taken together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Milliseconds since the Unix epoch. May jump in either direction.
    pub wall_ms: u64,
    /// Milliseconds on a never-decreasing timeline with an arbitrary origin.
    pub monotonic_ms: u64,
}

pub trait Clock: Send {
    /// Wall-clock milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Monotonic milliseconds since an arbitrary fixed origin.
    fn monotonic_ms(&self) -> u64;

    fn stamp(&self) -> Stamp {
        Stamp {
            wall_ms: self.now_ms(),
            monotonic_ms: self.monotonic_ms(),
        }
    }
}

/// Real time: [`chrono::Utc`] for the wall clock, [`Instant`] for intervals.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // Clamp pre-epoch clocks to zero rather than wrapping.
        Utc::now().timestamp_millis().max(0) as u64
    }

    fn monotonic_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to. Clones share the same time.
///
/// [`advance`][ManualClock::advance] moves both timelines;
/// [`step_wall_to`][ManualClock::step_wall_to] moves only the wall clock, the
/// way an NTP or RTC correction would.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    wall: Arc<AtomicU64>,
    monotonic: Arc<AtomicU64>,
}

impl ManualClock {
    /// Wall clock at `start_ms`, monotonic counter at zero.
    pub fn new(start_ms: u64) -> Self {
        Self {
            wall: Arc::new(AtomicU64::new(start_ms)),
            monotonic: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.wall.fetch_add(delta_ms, Ordering::SeqCst);
        self.monotonic.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn step_wall_to(&self, wall_ms: u64) {
        self.wall.store(wall_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.wall.load(Ordering::SeqCst)
    }

    fn monotonic_ms(&self) -> u64 {
        self.monotonic.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock::new().now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn system_monotonic_never_decreases() {
        let clock = SystemClock::new();
        let first = clock.monotonic_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.monotonic_ms() >= first + 5);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000);
        let view = clock.clone();
        clock.advance(250);
        assert_eq!(view.now_ms(), 1_250);
        assert_eq!(view.monotonic_ms(), 250);
    }

    #[test]
    fn wall_step_leaves_monotonic_alone() {
        let clock = ManualClock::new(1_000_000);
        clock.advance(100);
        clock.step_wall_to(940_000);
        assert_eq!(
            clock.stamp(),
            Stamp {
                wall_ms: 940_000,
                monotonic_ms: 100,
            }
        );
        clock.advance(50);
        assert_eq!(clock.now_ms(), 940_050);
        assert_eq!(clock.monotonic_ms(), 150);
    }
}
