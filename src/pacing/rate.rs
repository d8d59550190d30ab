//! Byte-rate governor
//!
//! Computes how many bytes may be written right now without exceeding the
//! configured ceiling. The allowance for a tick is
//! `floor(rate * Δt / 1_000_000)` where `Δt` is the time in microseconds
//! since the milestone.
//!
//! # Milestone
//!
//! The milestone only advances by the time the written bytes account for,
//! never past the current instant. `Δt` is capped at [`MAX_CREDIT`]: after a
//! stall the next tick may send at most one second's worth of data, so idle
//! time is neither accumulated as backlog nor charged against the sender.

use std::time::{Duration, Instant};

/// Longest elapsed time credited to a single tick
pub const MAX_CREDIT: Duration = Duration::from_secs(1);

/// Per-tick byte allowance for a bytes/second ceiling
#[derive(Debug, Clone)]
pub struct RateGovernor {
    rate: u64,
    milestone: Option<Instant>,
}

impl RateGovernor {
    /// Create a governor; `rate == 0` disables pacing
    pub fn new(rate: u64) -> Self {
        Self {
            rate,
            milestone: None,
        }
    }

    /// Configured ceiling in bytes per second
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Whether pacing is disabled
    pub fn is_unlimited(&self) -> bool {
        self.rate == 0
    }

    /// Current milestone, if any bytes were granted yet
    pub fn milestone(&self) -> Option<Instant> {
        self.milestone
    }

    fn credited(&self, now: Instant) -> Duration {
        match self.milestone {
            Some(m) => now.saturating_duration_since(m).min(MAX_CREDIT),
            None => MAX_CREDIT,
        }
    }

    /// Bytes that may be written now, clamped to `remaining` unsent bytes
    /// and the I/O `capacity`
    pub fn allowance(&self, now: Instant, remaining: usize, capacity: usize) -> usize {
        let cap = remaining.min(capacity);
        if self.is_unlimited() {
            return cap;
        }
        let micros = self.credited(now).as_micros();
        let bytes = (self.rate as u128 * micros) / 1_000_000;
        bytes.min(cap as u128) as usize
    }

    /// Record `written` bytes granted at `now`
    pub fn commit(&mut self, written: usize, now: Instant) {
        if self.is_unlimited() || written == 0 {
            return;
        }
        let floor = now.checked_sub(MAX_CREDIT).unwrap_or(now);
        let base = match self.milestone {
            Some(m) => m.max(floor),
            None => floor,
        };
        let spent_us = (written as u128 * 1_000_000) / self.rate as u128;
        let spent = Duration::from_micros(spent_us.min(u64::MAX as u128) as u64);
        self.milestone = Some((base + spent).min(now));
    }

    /// Time until at least `bytes` may be written
    pub fn delay_for(&self, bytes: usize, now: Instant) -> Duration {
        if self.is_unlimited() || bytes == 0 {
            return Duration::ZERO;
        }
        let needed_us = (bytes as u128 * 1_000_000).div_ceil(self.rate as u128);
        let needed = Duration::from_micros(needed_us.min(u64::MAX as u128) as u64).min(MAX_CREDIT);
        needed.saturating_sub(self.credited(now))
    }
}
