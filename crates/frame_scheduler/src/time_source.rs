use std::time::{Duration, Instant};

/// Tick source aligned to a timebase, so ticks stay on the vsync grid even when
/// a caller polls late.
#[derive(Debug, Clone)]
pub struct DelayBasedTimeSource {
    interval: Duration,
    timebase: Instant,
    active: bool,
    last_tick: Option<Instant>,
}

impl DelayBasedTimeSource {
    pub fn new(interval: Duration, timebase: Instant) -> Self {
        Self {
            interval,
            timebase,
            active: false,
            last_tick: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_tick(&self) -> Option<Instant> {
        self.last_tick
    }

    pub fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        if !active {
            self.last_tick = None;
        }
    }

    pub fn set_timebase_and_interval(&mut self, timebase: Instant, interval: Duration) {
        self.timebase = timebase;
        self.interval = interval;
    }

    /// First grid point strictly after `now`.
    pub fn next_tick_target(&self, now: Instant) -> Instant {
        if self.interval.is_zero() {
            return now;
        }
        if now < self.timebase {
            return self.timebase;
        }
        let since_timebase = now.duration_since(self.timebase);
        let interval_nanos = self.interval.as_nanos();
        let elapsed_intervals = since_timebase.as_nanos() / interval_nanos + 1;
        let offset_nanos = elapsed_intervals.saturating_mul(interval_nanos);
        let offset = Duration::from_nanos(u64::try_from(offset_nanos).unwrap_or(u64::MAX));
        self.timebase + offset
    }

    /// Returns true and records the tick when at least one interval elapsed
    /// since the previous tick.
    pub fn tick_if_due(&mut self, now: Instant) -> bool {
        if !self.active {
            return false;
        }
        let due = match self.last_tick {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_tick = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_tick_target_snaps_to_the_grid() {
        let timebase = Instant::now();
        let source = DelayBasedTimeSource::new(Duration::from_millis(10), timebase);

        assert_eq!(
            source.next_tick_target(timebase + Duration::from_millis(3)),
            timebase + Duration::from_millis(10)
        );
        assert_eq!(
            source.next_tick_target(timebase + Duration::from_millis(10)),
            timebase + Duration::from_millis(20)
        );
    }

    #[test]
    fn inactive_source_never_ticks() {
        let timebase = Instant::now();
        let mut source = DelayBasedTimeSource::new(Duration::from_millis(10), timebase);
        assert!(!source.tick_if_due(timebase));

        source.set_active(true);
        assert!(source.tick_if_due(timebase));
        assert!(!source.tick_if_due(timebase + Duration::from_millis(5)));
        assert!(source.tick_if_due(timebase + Duration::from_millis(10)));

        source.set_active(false);
        assert_eq!(source.last_tick(), None);
    }
}
