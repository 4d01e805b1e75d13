//! Slew rate limiter

use super::SlewParams;
use util::maths::clamp_abs;

/// Bounds the change of a signal between consecutive steps.
#[derive(Debug, Clone)]
pub struct SlewLimiter {
    params: SlewParams,

    /// The last value emitted
    prev: f64,
}

impl SlewLimiter {
    pub fn new(params: SlewParams) -> Self {
        Self { params, prev: 0.0 }
    }

    /// Move toward `target` by at most the maximum delta, and remember the result.
    pub fn limit(&mut self, target: f64) -> f64 {
        if self.params.enabled {
            self.prev += clamp_abs(&(target - self.prev), &self.params.max_delta_per_step);
        } else {
            self.prev = target;
        }
        self.prev
    }

    /// Override the remembered value, used when the output is clamped after limiting.
    pub fn set_prev(&mut self, value: f64) {
        self.prev = value;
    }

    pub fn prev(&self) -> f64 {
        self.prev
    }

    /// Zero the history, the next step ramps from zero.
    pub fn reset(&mut self) {
        self.prev = 0.0;
    }
}
