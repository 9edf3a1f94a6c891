//! Time types measured against the kernel tick.

pub mod tick;

use crate::kernel::{Kernel, Tick};

/// A duration of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Self = Self(0);

    /// Create a duration from nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create a duration from microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    /// Create a duration from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Create a duration from seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Get nanoseconds in this duration.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Get microseconds in this duration.
    pub const fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    /// Get milliseconds in this duration.
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Whole ticks covering this duration at `tick_rate_hz`, rounded up.
    pub fn to_ticks(self, tick_rate_hz: u32) -> Tick {
        tick::nanos_to_ticks(self.0, tick_rate_hz)
    }

    /// Duration of `ticks` ticks at `tick_rate_hz`.
    pub fn from_ticks(ticks: Tick, tick_rate_hz: u32) -> Self {
        Self(tick::ticks_to_nanos(ticks, tick_rate_hz))
    }
}

impl From<core::time::Duration> for Duration {
    fn from(duration: core::time::Duration) -> Self {
        Self(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl From<Duration> for core::time::Duration {
    fn from(duration: Duration) -> Self {
        core::time::Duration::from_nanos(duration.0)
    }
}

impl core::ops::Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

/// A point in kernel time, counted in ticks since the scheduler started.
///
/// The tick counter wraps, so instants compare by wrapping distance: an
/// instant is "after" another when it lies less than half the tick range
/// ahead of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instant(Tick);

impl Instant {
    pub const fn from_ticks(ticks: Tick) -> Self {
        Self(ticks)
    }

    /// The current kernel time.
    pub fn now<K: Kernel>() -> Self {
        Self(K::tick_count())
    }

    pub const fn ticks(self) -> Tick {
        self.0
    }

    /// Ticks elapsed from `earlier` to `self`, modulo the tick range.
    pub const fn ticks_since(self, earlier: Instant) -> Tick {
        self.0.wrapping_sub(earlier.0)
    }

    /// Whether `self` lies strictly ahead of `other`.
    pub const fn is_after(self, other: Instant) -> bool {
        tick::is_after(self.0, other.0)
    }

    pub const fn add_ticks(self, ticks: Tick) -> Self {
        Self(self.0.wrapping_add(ticks))
    }

    /// `self + duration` for a kernel ticking at `tick_rate_hz`.
    pub fn add_duration(self, duration: Duration, tick_rate_hz: u32) -> Self {
        self.add_ticks(duration.to_ticks(tick_rate_hz))
    }

    /// Elapsed time from `earlier` to `self`.
    pub fn duration_since(self, earlier: Instant, tick_rate_hz: u32) -> Duration {
        Duration::from_ticks(self.ticks_since(earlier), tick_rate_hz)
    }
}
