//! Monotonic time for timer deadlines.
//!
//! Deadlines are compared as integer nanosecond counts in a single
//! process-wide monotonic domain, anchored at the first observation of
//! the clock. Timer callbacks therefore order totally and cheaply
//! without touching `Instant` arithmetic on the hot path.

use std::ops::Add;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// A point in the process-wide monotonic clock domain.
///
/// Internally a nanosecond count since the process epoch. `Time` is
/// totally ordered; equal values compare equal across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The process epoch.
    pub const ZERO: Self = Self(0);

    /// Returns the current monotonic time.
    #[must_use]
    pub fn now() -> Self {
        Self(duration_to_nanos(epoch().elapsed()))
    }

    /// Constructs a time from a nanosecond count since the epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Constructs a time from a millisecond count since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Returns the nanosecond count since the epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the duration from `earlier` to `self`, or zero if
    /// `earlier` is later.
    #[must_use]
    pub const fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(duration_to_nanos(rhs)))
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let a = Time::now();
        let b = Time::now();
        assert!(b >= a);
    }

    #[test]
    fn from_millis_scales() {
        assert_eq!(Time::from_millis(2).as_nanos(), 2_000_000);
    }

    #[test]
    fn saturating_since_clamps_to_zero() {
        let early = Time::from_millis(10);
        let late = Time::from_millis(30);
        assert_eq!(late.saturating_since(early), Duration::from_millis(20));
        assert_eq!(early.saturating_since(late), Duration::ZERO);
    }

    #[test]
    fn add_duration() {
        let t = Time::from_millis(5) + Duration::from_millis(7);
        assert_eq!(t, Time::from_millis(12));
    }

    #[test]
    fn add_saturates_at_max() {
        let t = Time::from_nanos(u64::MAX) + Duration::from_secs(1);
        assert_eq!(t.as_nanos(), u64::MAX);
    }
}
