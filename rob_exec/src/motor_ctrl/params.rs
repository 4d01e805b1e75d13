//! Parameters structure for motor control

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::params::{invalid, non_negative, positive, ParamsError};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for motor control.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Rate of the control step
    ///
    /// Units: Hz
    pub control_freq_hz: f64,

    /// Absolute limit on the power of either wheel, in (0, 1]
    pub max_power_limit: f64,

    /// Number of steps the last output is held for while encoder feedback is missing, after
    /// which the wheels are stopped
    pub max_stale_steps: u64,

    /// Time the last command is held for when no fresh command arrives, after which the wheels
    /// are ramped down to zero at the slew rate
    ///
    /// Units: seconds
    pub cmd_timeout_s: f64,

    // Pin assignments, carried for the hardware driver
    pub port_pwm_pin: u8,
    pub stbd_pwm_pin: u8,
    pub port_encoder_a_pin: u8,
    pub port_encoder_b_pin: u8,
    pub stbd_encoder_a_pin: u8,
    pub stbd_encoder_b_pin: u8,

    pub pid: PidParams,

    pub slew: SlewParams,
}

/// Gains and limits of the wheel velocity PID controllers.
///
/// The controller's input is a velocity error in cm/s and its output a normalised power.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PidParams {
    pub k_p: f64,
    pub k_i: f64,
    pub k_d: f64,

    pub min_output: f64,
    pub max_output: f64,

    /// Absolute limit on the integral accumulator
    ///
    /// Units: cm
    pub integral_limit: f64,

    /// Minimum time between two samples, a step sooner than this returns the previous output
    ///
    /// Units: seconds
    pub sample_time_s: f64,
}

/// Slew rate limiting of the wheel power.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SlewParams {
    pub enabled: bool,

    /// Largest change in wheel power between two consecutive steps
    pub max_delta_per_step: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Params {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        positive("motors", "control_freq_hz", self.control_freq_hz)?;
        positive("motors", "cmd_timeout_s", self.cmd_timeout_s)?;

        if !(self.max_power_limit > 0.0 && self.max_power_limit <= 1.0) {
            return Err(invalid("motors", "max_power_limit", "must be in (0, 1]"));
        }

        let pins = [
            self.port_pwm_pin,
            self.stbd_pwm_pin,
            self.port_encoder_a_pin,
            self.port_encoder_b_pin,
            self.stbd_encoder_a_pin,
            self.stbd_encoder_b_pin,
        ];
        for (i, p) in pins.iter().enumerate() {
            if pins[..i].contains(p) {
                return Err(ParamsError::Invalid {
                    section: "motors",
                    name: "pins",
                    reason: format!("pin {} is assigned more than once", p),
                });
            }
        }

        self.pid.are_valid()?;
        self.slew.are_valid()
    }
}

impl PidParams {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        for (name, gain) in [("k_p", self.k_p), ("k_i", self.k_i), ("k_d", self.k_d)].iter() {
            non_negative("motors.pid", *name, *gain)?;
        }

        if !(self.min_output.is_finite() && self.max_output.is_finite())
            || self.min_output >= self.max_output
        {
            return Err(invalid(
                "motors.pid",
                "min_output",
                "must be less than max_output",
            ));
        }

        non_negative("motors.pid", "integral_limit", self.integral_limit)?;
        non_negative("motors.pid", "sample_time_s", self.sample_time_s)
    }
}

impl SlewParams {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        if self.enabled {
            positive("motors.slew", "max_delta_per_step", self.max_delta_per_step)?;
        }
        Ok(())
    }
}
