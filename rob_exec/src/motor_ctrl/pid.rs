//! # Wheel velocity PID controller

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use super::PidParams;
use util::maths::{clamp, clamp_abs};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// A PID controller with a bounded integral and a clamped output.
#[derive(Debug, Serialize, Clone)]
pub struct PidController {
    #[serde(skip)]
    params: PidParams,

    /// Previous error, `None` until the first sample
    prev_error: Option<f64>,

    /// The integral accumulation
    integral: f64,

    /// The derivative of the error on the last sample
    derivative: f64,

    /// Time accumulated since the last sample
    since_sample_s: f64,

    /// Output of the last sample
    output: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl PidController {
    /// Create a new controller with the given gains and limits.
    pub fn new(params: PidParams) -> Self {
        Self {
            params,
            prev_error: None,
            integral: 0.0,
            derivative: 0.0,
            since_sample_s: 0.0,
            output: 0.0,
        }
    }

    /// Get the output of the controller for the given error, `dt` seconds after the previous
    /// call.
    ///
    /// If less than the sample time has passed since the last sample the previous output is
    /// returned and the error is ignored.
    pub fn get(&mut self, error: f64, dt: f64) -> f64 {
        if !(error.is_finite() && dt.is_finite()) || dt < 0.0 {
            return self.output;
        }

        self.since_sample_s += dt;

        if self.prev_error.is_some() && self.since_sample_s < self.params.sample_time_s {
            return self.output;
        }

        let dt = self.since_sample_s;
        self.since_sample_s = 0.0;

        // Accumulate the integral, bounded so that it can't wind up while the wheel is stalled
        self.integral = clamp_abs(
            &(self.integral + error * dt),
            &self.params.integral_limit,
        );

        // No derivative on the first sample, since there is no previous error to compare to
        self.derivative = match self.prev_error {
            Some(e) if dt > 0.0 => (error - e) / dt,
            _ => 0.0,
        };
        self.prev_error = Some(error);

        let raw = self.params.k_p * error
            + self.params.k_i * self.integral
            + self.params.k_d * self.derivative;

        self.output = clamp(&raw, &self.params.min_output, &self.params.max_output);
        self.output
    }

    /// Clear all accumulated state.
    pub fn reset(&mut self) {
        self.prev_error = None;
        self.integral = 0.0;
        self.derivative = 0.0;
        self.since_sample_s = 0.0;
        self.output = 0.0;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn derivative(&self) -> f64 {
        self.derivative
    }

    /// The output of the last sample.
    pub fn output(&self) -> f64 {
        self.output
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> PidParams {
        PidParams {
            k_p: 0.01,
            k_i: 0.05,
            k_d: 0.001,
            min_output: -1.0,
            max_output: 1.0,
            integral_limit: 100.0,
            sample_time_s: 0.0,
        }
    }

    #[test]
    fn test_output_always_bounded() {
        let mut pid = PidController::new(params());

        // A volatile error sequence with large swings
        let mut error = 0.0f64;
        for i in 0..500 {
            error = (error * 1.7 + (i as f64 * 0.37).sin() * 400.0) % 1000.0;
            let out = pid.get(error, 0.02);
            assert!(out >= -1.0 && out <= 1.0, "output {} out of range", out);
            assert!(pid.integral().abs() <= 100.0);
        }
    }

    #[test]
    fn test_stalled_wheel_saturates() {
        // Zero measured motion against a 50 cm/s target
        let mut pid = PidController::new(PidParams {
            k_d: 0.0,
            ..params()
        });

        let mut prev_integral = 0.0;
        let mut prev_out = 0.0;
        let mut saturated = false;
        for _ in 0..200 {
            let out = pid.get(50.0, 0.05);

            assert!(pid.integral() >= prev_integral);
            assert!(out >= prev_out);
            assert!(out <= 1.0);

            if !saturated && out < 1.0 {
                assert!(pid.integral() > prev_integral);
            }
            saturated |= out == 1.0;

            prev_integral = pid.integral();
            prev_out = out;
        }

        assert!(saturated);
        assert_eq!(pid.integral(), 100.0);
    }

    #[test]
    fn test_first_sample_has_no_derivative() {
        let mut pid = PidController::new(params());
        pid.get(10.0, 0.1);
        assert_eq!(pid.derivative(), 0.0);

        pid.get(20.0, 0.1);
        assert!((pid.derivative() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_time_holds_output() {
        let mut pid = PidController::new(PidParams {
            sample_time_s: 0.1,
            ..params()
        });

        let first = pid.get(10.0, 0.05);
        assert_eq!(pid.get(-50.0, 0.05 - 1e-6), first);

        // Enough time accumulated, sample again
        assert!(pid.get(-50.0, 0.06) < first);
    }

    #[test]
    fn test_reset() {
        let mut pid = PidController::new(params());
        pid.get(50.0, 0.1);
        pid.get(60.0, 0.1);
        pid.reset();

        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.derivative(), 0.0);
        assert_eq!(pid.output(), 0.0);
    }
}
