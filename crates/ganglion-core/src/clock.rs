//! Fixed-interval clocks
//!
//! A [`Clock`] fires every `dt` seconds of simulated time. Fire times are
//! always computed as `steps * dt` rather than accumulated, so long runs
//! do not drift and a replay after reset reproduces the exact same floats.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Information handed to every entry-point invocation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcInfo {
    /// Start of the interval being processed (or the delivery instant)
    pub time: f64,
    /// Interval length of the dispatching clock; zero outside tick dispatch
    pub dt: f64,
    /// Dispatching tick, `None` for message delivery
    pub tick: Option<usize>,
}

/// Clock owned by one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    dt: f64,
    steps: u64,
}

impl Clock {
    /// Create a clock with interval `dt`; `dt` must be finite and positive
    pub fn new(dt: f64) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "clock dt must be positive and finite, got {}",
                dt
            )));
        }
        Ok(Self { dt, steps: 0 })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Completed steps since the last reset
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Time at which the next step fires
    pub fn next_fire(&self) -> f64 {
        self.steps as f64 * self.dt
    }

    /// Time at which the next step's interval ends
    pub fn step_end(&self) -> f64 {
        (self.steps + 1) as f64 * self.dt
    }

    /// Whether the next step completes no later than `end`
    pub fn is_eligible(&self, end: f64, tolerance: f64) -> bool {
        self.step_end() <= end + tolerance * end.abs()
    }

    pub fn advance(&mut self) {
        self.steps += 1;
    }

    pub fn reset(&mut self) {
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_rejects_bad_dt() {
        assert!(Clock::new(0.0).is_err());
        assert!(Clock::new(-1.0).is_err());
        assert!(Clock::new(f64::NAN).is_err());
        assert!(Clock::new(1e-4).is_ok());
    }

    #[test]
    fn test_fire_times_are_multiplied() {
        let mut clock = Clock::new(0.1).unwrap();
        for _ in 0..1000 {
            clock.advance();
        }
        assert_eq!(clock.next_fire(), 1000.0 * 0.1);
        assert_eq!(clock.steps(), 1000);
        clock.reset();
        assert_eq!(clock.next_fire(), 0.0);
    }

    #[test]
    fn test_eligibility_is_tolerant() {
        let mut clock = Clock::new(0.1).unwrap();
        clock.advance();
        clock.advance();
        // 3 * 0.1 rounds slightly above 0.3
        assert!(clock.step_end() > 0.3);
        assert!(!clock.is_eligible(0.3, 0.0));
        assert!(clock.is_eligible(0.3, 1e-9));
        clock.advance();
        assert!(!clock.is_eligible(0.3, 1e-9));
    }
}
