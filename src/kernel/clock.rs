// Monotonic time source for the scheduler
//
// Deadlines and timeouts are compared against Clock::now(); sleep() is
// only called by the run loop between ticks, never from inside a task.
// SystemClock reads the embassy time driver. ManualClock only moves
// when told to (or when the loop "sleeps"), which makes simulations
// and tests deterministic.

use alloc::rc::Rc;
use core::cell::Cell;

use embassy_time::{Duration, Instant};

pub trait Clock {
    /// Current monotonic time. Never runs backward.
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time from the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        #[cfg(feature = "std")]
        {
            std::thread::sleep(core::time::Duration::from_micros(duration.as_micros()));
        }

        #[cfg(not(feature = "std"))]
        {
            embassy_time::block_for(duration);
        }
    }
}

/// Shared, manually advanced clock. Clones observe the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::from_ticks(0))
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(deadline_after(self.now.get(), by));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// `from + by`, saturating at the end of time.
pub fn deadline_after(from: Instant, by: Duration) -> Instant {
    from.checked_add(by).unwrap_or(Instant::MAX)
}

/// Time elapsed from `since` to `now`, zero if `now` is earlier.
pub fn elapsed_between(since: Instant, now: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now(), Instant::from_millis(250));

        other.sleep(Duration::from_secs(1));
        assert_eq!(clock.now(), Instant::from_millis(1250));
    }

    #[test]
    fn deadline_saturates() {
        let near_end = Instant::MAX;
        assert_eq!(deadline_after(near_end, Duration::from_secs(5)), Instant::MAX);

        let start = Instant::from_secs(3);
        assert_eq!(
            deadline_after(start, Duration::from_millis(500)),
            Instant::from_millis(3500)
        );
    }

    #[test]
    fn elapsed_never_negative() {
        let early = Instant::from_secs(1);
        let late = Instant::from_secs(4);
        assert_eq!(elapsed_between(early, late), Duration::from_secs(3));
        assert_eq!(elapsed_between(late, early), Duration::from_ticks(0));
    }
}
