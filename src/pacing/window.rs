//! Transfer window guard
//!
//! Bounds how many transfers may start inside one `interval` window, with
//! separate budgets for idle ticks (starved for input) and busy ticks
//! (input flowing or buffered). Counters reset exactly at window
//! boundaries; the window start advances by whole intervals so boundaries
//! do not drift with loop latency.

use std::time::{Duration, Instant};

/// Classification of a loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// No new input and nothing buffered
    Idle,
    /// New input read this tick, or unsent input left from before
    Busy,
}

/// Transfers started in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCounters {
    pub idle: u32,
    pub busy: u32,
}

/// Per-window transfer limiter
#[derive(Debug, Clone)]
pub struct TransferWindowGuard {
    idle_limit: u32,
    busy_limit: u32,
    interval: Duration,
    started: Instant,
    counters: WindowCounters,
}

impl TransferWindowGuard {
    pub fn new(idle_limit: u32, busy_limit: u32, interval: Duration, now: Instant) -> Self {
        Self {
            idle_limit,
            busy_limit,
            interval,
            started: now,
            counters: WindowCounters::default(),
        }
    }

    /// Counters for the current window
    pub fn counters(&self) -> WindowCounters {
        self.counters
    }

    /// Reset counters if one or more window boundaries were crossed.
    /// Returns true when a reset happened.
    pub fn roll(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.interval {
            return false;
        }
        if self.interval.is_zero() {
            self.started = now;
        } else {
            let windows = elapsed.as_nanos() / self.interval.as_nanos();
            let advance = self.interval.as_nanos() * windows;
            self.started += Duration::from_nanos(advance.min(u64::MAX as u128) as u64);
        }
        self.counters = WindowCounters::default();
        true
    }

    /// Whether a transfer of this kind may start now
    pub fn allows(&mut self, kind: TickKind, now: Instant) -> bool {
        self.roll(now);
        match kind {
            TickKind::Idle => self.counters.idle < self.idle_limit,
            TickKind::Busy => self.counters.busy < self.busy_limit,
        }
    }

    /// Count a transfer that started
    pub fn record(&mut self, kind: TickKind) {
        match kind {
            TickKind::Idle => self.counters.idle += 1,
            TickKind::Busy => self.counters.busy += 1,
        }
    }

    /// [`allows`](Self::allows) followed by [`record`](Self::record) on success
    pub fn try_acquire(&mut self, kind: TickKind, now: Instant) -> bool {
        if self.allows(kind, now) {
            self.record(kind);
            true
        } else {
            false
        }
    }

    /// Time left until the next window boundary
    pub fn until_boundary(&self, now: Instant) -> Duration {
        (self.started + self.interval).saturating_duration_since(now)
    }
}
