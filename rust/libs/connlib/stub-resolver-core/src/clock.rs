//! Clock & Timer Wheel (spec §2 item 1).
//!
//! A thin wrapper around [`tokio::time::Instant`] plus an ordered set of
//! scheduled wake-ups. Kept as its own module, mirroring how
//! `dns-over-tcp::client::Client` separates `created_at`/`last_now`
//! bookkeeping from the rest of its sans-IO state.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

/// Monotonic time source. A trivial wrapper today, but keeping it behind a
/// named type means tests can substitute `tokio::time::pause()` controlled
/// clocks without threading `Instant::now()` calls through every module.
#[derive(Debug, Clone, Copy)]
pub struct Clock;

impl Clock {
    pub fn now(&self) -> Instant {
        Instant::now()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self
    }
}

/// An ordered set of absolute wake-up times. The orchestrator's tick loop
/// asks this for "when should I next wake up" so it can sleep precisely
/// instead of busy-polling at the tick cadence alone.
#[derive(Debug, Default)]
pub struct TimerWheel {
    fire_times: BTreeSet<Instant>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant) {
        self.fire_times.insert(at);
    }

    pub fn cancel(&mut self, at: Instant) {
        self.fire_times.remove(&at);
    }

    /// The next absolute time this wheel wants to be polled, if any.
    pub fn next_fire(&self) -> Option<Instant> {
        self.fire_times.iter().next().copied()
    }

    /// How long to sleep before the next fire, clamped to `max`.
    pub fn sleep_duration(&self, now: Instant, max: Duration) -> Duration {
        match self.next_fire() {
            Some(fire) if fire > now => (fire - now).min(max),
            Some(_) => Duration::ZERO,
            None => max,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fire_times.is_empty()
    }
}
