//! Tick scheduling: when does the next sample run.
//!
//! Two policies. `Fixed` sleeps a constant duration between ticks.
//! `Aligned` targets stable wall-clock phases (with an optional offset)
//! so many reporters feeding one collector land their samples in the
//! same aggregation windows regardless of when each process started.
//! The delay computation is pure in the current time, so tests inject a
//! clock instead of sleeping.

use std::time::Duration;

use serde::Deserialize;

/// Which scheduling policy the reporter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePolicy {
    /// Sleep the configured interval, unconditionally, every tick.
    Fixed,
    /// Align ticks to wall-clock boundaries of the interval, shifted by
    /// the configured offset.
    #[default]
    Aligned,
}

/// A tick schedule: computes the wait before the next sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    Fixed { interval: f64 },
    Aligned { interval: f64, offset: f64 },
}

impl Schedule {
    pub fn new(policy: SchedulePolicy, interval: f64, offset: f64) -> Self {
        match policy {
            SchedulePolicy::Fixed => Schedule::Fixed { interval },
            SchedulePolicy::Aligned => Schedule::Aligned { interval, offset },
        }
    }

    /// The wait until the next tick, given the current unix time in
    /// seconds. Zero when the previous tick overran its slot, so the
    /// worker proceeds immediately rather than skipping a boundary.
    pub fn delay_from(&self, now: f64) -> Duration {
        match *self {
            Schedule::Fixed { interval } => Duration::from_secs_f64(interval.max(0.0)),
            Schedule::Aligned { interval, offset } => {
                let shifted = now + offset;
                let boundary = shifted - (shifted % interval);
                let target = boundary + interval - offset;
                let sleep = target - now;
                if sleep > 0.0 {
                    Duration::from_secs_f64(sleep)
                } else {
                    Duration::ZERO
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_always_sleeps_the_interval() {
        let schedule = Schedule::new(SchedulePolicy::Fixed, 60.0, 0.0);
        assert_eq!(schedule.delay_from(83.0), Duration::from_secs(60));
        assert_eq!(schedule.delay_from(0.0), Duration::from_secs(60));
    }

    #[test]
    fn aligned_targets_the_next_interval_boundary() {
        // 23 seconds past a minute boundary: wake at the next one.
        let schedule = Schedule::new(SchedulePolicy::Aligned, 60.0, 0.0);
        assert_eq!(schedule.delay_from(83.0), Duration::from_secs(37));
    }

    #[test]
    fn aligned_on_a_boundary_waits_a_full_interval() {
        let schedule = Schedule::new(SchedulePolicy::Aligned, 60.0, 0.0);
        assert_eq!(schedule.delay_from(120.0), Duration::from_secs(60));
    }

    #[test]
    fn offset_shifts_the_phase() {
        // interval 60, offset 15: ticks land at :45 past each minute.
        let schedule = Schedule::new(SchedulePolicy::Aligned, 60.0, 15.0);
        assert_eq!(schedule.delay_from(100.0), Duration::from_secs(5));
        assert_eq!(schedule.delay_from(106.0), Duration::from_secs(59));
    }

    #[test]
    fn delay_is_positive_and_bounded_by_the_interval() {
        let schedule = Schedule::new(SchedulePolicy::Aligned, 60.0, 15.0);
        for now in [0.0, 1.5, 44.9, 45.0, 59.9, 83.0, 104.0, 105.0, 3600.25] {
            let delay = schedule.delay_from(now);
            assert!(delay > Duration::ZERO, "delay at {now} was zero");
            assert!(delay <= Duration::from_secs(60), "delay at {now} too long");
        }
    }
}
