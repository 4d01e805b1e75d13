//! General time utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono;
use log::warn;
use std::thread;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Keeps a loop running at a fixed period.
///
/// Call [`CycleTimer::start`] at the top of each cycle and [`CycleTimer::wait`] at the bottom.
/// `wait` sleeps for whatever remains of the period, or records an overrun if the cycle took
/// longer than the period.
#[derive(Debug, Clone)]
pub struct CycleTimer {
    /// Name used when reporting overruns
    name: &'static str,

    /// Target cycle period
    period: Duration,

    /// Start of the current cycle
    cycle_start: Instant,

    /// Start of the previous cycle, used to measure the real elapsed time between cycles
    prev_cycle_start: Option<Instant>,

    /// Number of consecutive cycle overruns
    num_consec_overruns: u64
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CycleTimer {
    /// Create a new timer with the given period.
    pub fn new(name: &'static str, period_s: f64) -> Self {
        Self {
            name,
            period: Duration::from_secs_f64(period_s.max(0.0)),
            cycle_start: Instant::now(),
            prev_cycle_start: None,
            num_consec_overruns: 0
        }
    }

    /// Create a new timer running at the given frequency.
    pub fn from_frequency(name: &'static str, frequency_hz: f64) -> Self {
        Self::new(name, 1.0 / frequency_hz)
    }

    /// Mark the start of a cycle.
    ///
    /// Returns the number of seconds since the start of the previous cycle, or the nominal
    /// period if this is the first cycle.
    pub fn start(&mut self) -> f64 {
        let now = Instant::now();
        let dt = match self.prev_cycle_start {
            Some(p) => (now - p).as_secs_f64(),
            None => self.period.as_secs_f64()
        };

        self.prev_cycle_start = Some(now);
        self.cycle_start = now;

        dt
    }

    /// Sleep until the end of the current cycle.
    pub fn wait(&mut self) {
        let cycle_dur = Instant::now() - self.cycle_start;

        match self.period.checked_sub(cycle_dur) {
            Some(d) => {
                self.num_consec_overruns = 0;
                thread::sleep(d);
            },
            None => {
                self.num_consec_overruns += 1;
                warn!(
                    "{} cycle overran by {:.06} s ({} consecutive)",
                    self.name,
                    cycle_dur.as_secs_f64() - self.period.as_secs_f64(),
                    self.num_consec_overruns
                );
            }
        }
    }

    /// The nominal period of the timer in seconds.
    pub fn period_s(&self) -> f64 {
        self.period.as_secs_f64()
    }

    /// Number of consecutive overruns seen so far.
    pub fn num_consec_overruns(&self) -> u64 {
        self.num_consec_overruns
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(duration_to_seconds(chrono::Duration::milliseconds(1500)), Some(1.5));
        assert_eq!(duration_to_seconds(chrono::Duration::max_value()), None);
    }

    #[test]
    fn test_cycle_timer_first_dt_is_period() {
        let mut timer = CycleTimer::from_frequency("test", 50.0);
        assert!((timer.start() - 0.02).abs() < 1e-9);

        timer.wait();
        assert!(timer.start() >= 0.0);
    }
}
