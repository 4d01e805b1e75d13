//! # Robot parameters
//!
//! The whole configuration of the stack is a single TOML document deserialised into
//! [`RobotParams`]. It is loaded once at startup, validated, and then shared read-only as an
//! `Arc<RobotParams>` snapshot.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::path::Path;
use std::sync::Arc;
use log::info;
use serde::Deserialize;

// Internal
use crate::{arbitrator, behav, clock, motor_ctrl, odometry, safety, sensors, sim, tm};
use util::params::{self, LoadError};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// The complete parameter snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct RobotParams {
    pub clock: clock::Params,

    pub bus: BusParams,

    pub arbitrator: arbitrator::Params,

    pub behaviours: behav::Params,

    pub motors: motor_ctrl::Params,

    pub geometry: odometry::Geometry,

    pub sensors: sensors::Params,

    pub safety: safety::Params,

    pub sim: sim::Params,

    pub tm: tm::Params,
}

/// Parameters for the message bus.
#[derive(Debug, Clone, Deserialize)]
pub struct BusParams {
    /// Maximum number of events held for each subscriber before the oldest is dropped
    pub queue_depth: usize,

    /// Rate at which queued events are delivered to handler subscribers
    ///
    /// Units: Hz
    pub pump_freq_hz: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("Could not load the parameter file: {0}")]
    LoadError(#[from] LoadError),

    #[error("Invalid parameter [{section}] {name}: {reason}")]
    Invalid {
        section: &'static str,
        name: &'static str,
        reason: String,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl RobotParams {
    /// Load and validate the parameter snapshot from the given file.
    ///
    /// Relative paths are resolved inside the software root's `params` directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, ParamsError> {
        let p: Self = params::load(path)?;
        p.are_valid()?;

        info!(
            "Loaded parameters: clock {} Hz (tock every {}), arbitrator {} s / {} s ballistic, \
            motors {} Hz",
            p.clock.loop_freq_hz,
            p.clock.tock_modulo,
            p.arbitrator.loop_delay_s,
            p.arbitrator.ballistic_loop_delay_s,
            p.motors.control_freq_hz
        );

        Ok(Arc::new(p))
    }

    /// Parse and validate a parameter snapshot from a string.
    pub fn from_toml_str(s: &str) -> Result<Self, ParamsError> {
        let p: Self = params::from_str(s)?;
        p.are_valid()?;
        Ok(p)
    }

    /// Check every section of the snapshot for semantic errors.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        self.clock.are_valid()?;

        if self.bus.queue_depth == 0 {
            return Err(invalid("bus", "queue_depth", "must be at least 1"));
        }
        positive("bus", "pump_freq_hz", self.bus.pump_freq_hz)?;

        self.arbitrator.are_valid()?;
        self.behaviours.are_valid()?;
        self.motors.are_valid()?;
        self.geometry.are_valid()?;
        self.sensors.are_valid()?;
        self.sim.are_valid()?;
        self.tm.are_valid()?;

        Ok(())
    }
}

/// Build an [`ParamsError::Invalid`].
pub(crate) fn invalid(section: &'static str, name: &'static str, reason: &str) -> ParamsError {
    ParamsError::Invalid {
        section,
        name,
        reason: reason.to_string(),
    }
}

/// Check that a value is finite and strictly positive.
pub(crate) fn positive(section: &'static str, name: &'static str, value: f64) -> Result<(), ParamsError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParamsError::Invalid {
            section,
            name,
            reason: format!("must be greater than zero, found {}", value),
        })
    }
}

/// Check that a value is finite and not negative.
pub(crate) fn non_negative(
    section: &'static str,
    name: &'static str,
    value: f64,
) -> Result<(), ParamsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ParamsError::Invalid {
            section,
            name,
            reason: format!("must not be negative, found {}", value),
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// The parameter file shipped with the software.
    pub(crate) const ROBOT_TOML: &str = include_str!("../../params/robot.toml");

    /// The shipped parameters, for use in other modules' tests.
    pub(crate) fn robot_params() -> RobotParams {
        RobotParams::from_toml_str(ROBOT_TOML).unwrap()
    }

    #[test]
    fn test_shipped_params_are_valid() {
        let p = robot_params();
        assert_eq!(p.sensors.adapters.len(), 4);
        assert!(p.arbitrator.ballistic_loop_delay_s < p.arbitrator.loop_delay_s);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let s = format!("{}\n[unused_section]\nfoo = 1\n", ROBOT_TOML);
        assert!(RobotParams::from_toml_str(&s).is_ok());
    }

    #[test]
    fn test_missing_key_is_error() {
        let s = ROBOT_TOML.replace("tock_modulo", "tick_modulo");
        match RobotParams::from_toml_str(&s) {
            Err(ParamsError::LoadError(LoadError::DeserialiseError(_))) => (),
            r => panic!("Expected a deserialise error, got {:?}", r.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_value_is_error() {
        let s = ROBOT_TOML.replace("tock_modulo = 10", "tock_modulo = 0");
        match RobotParams::from_toml_str(&s) {
            Err(ParamsError::Invalid { section, name, .. }) => {
                assert_eq!(section, "clock");
                assert_eq!(name, "tock_modulo");
            }
            r => panic!("Expected an invalid param error, got {:?}", r.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_adapter_kind_is_error() {
        let s = ROBOT_TOML.replace("kind = \"imu\"", "kind = \"lidar\"");
        assert!(RobotParams::from_toml_str(&s).is_err());
    }
}
