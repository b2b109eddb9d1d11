//! Wall-clock time anchored to tokio's monotonic clock.
//!
//! Target times are wall-clock seconds (they become sink timestamps), while
//! sleeping goes through `tokio::time`. [`Clock`] reads the wall clock once and
//! advances it with `tokio::time::Instant`, which keeps scheduling immune to
//! wall-clock steps and lets tests drive the whole scheduler under paused time.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Convert a std duration into a chrono delta, saturating on overflow.
pub(crate) fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Monotonic wall clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Anchor at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Anchor at an arbitrary wall time (used by tests).
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            wall_anchor: wall,
            mono_anchor: Instant::now(),
        }
    }

    /// Current wall time.
    pub fn now(&self) -> DateTime<Utc> {
        self.wall_anchor + to_delta(self.mono_anchor.elapsed())
    }

    /// Time left until `t`, or `None` if it has passed.
    pub fn until(&self, t: DateTime<Utc>) -> Option<Duration> {
        (t - self.now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Sleep until wall time `t`. Returns immediately if `t` has passed.
    pub async fn sleep_until(&self, t: DateTime<Utc>) {
        if let Some(remaining) = self.until(t) {
            tokio::time::sleep(remaining).await;
        }
    }
}

/// `ceil(t)` to a whole second.
pub fn ceil_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    let whole = t.timestamp();
    let secs = if t.timestamp_subsec_nanos() > 0 {
        whole + 1
    } else {
        whole
    };
    DateTime::from_timestamp(secs, 0).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ceil_to_second() {
        let exact = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        assert_eq!(ceil_to_second(exact), exact);

        let fractional = exact + TimeDelta::milliseconds(1);
        assert_eq!(
            ceil_to_second(fractional),
            exact + TimeDelta::seconds(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Clock::starting_at(start);

        tokio::time::advance(Duration::from_millis(2500)).await;
        assert_eq!(clock.now(), start + TimeDelta::milliseconds(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Clock::starting_at(start);
        let target = start + TimeDelta::seconds(3);

        clock.sleep_until(target).await;
        assert!(clock.now() >= target);
        assert_eq!(clock.until(target), None);

        // past targets return without sleeping
        let before = clock.now();
        clock.sleep_until(start).await;
        assert_eq!(clock.now(), before);
    }
}
