//! Parameters structure for the behaviours

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::params::{invalid, non_negative, positive, ParamsError};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for every behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    pub cruise: CruiseParams,

    pub avoidance: AvoidanceParams,

    pub targeting: TargetingParams,

    pub idle: IdleParams,
}

/// Parameters for the Cruise behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct CruiseParams {
    pub enabled: bool,

    pub priority: i32,

    /// Number of arbitration cycles a request stays valid for
    pub validity_cycles: u64,

    /// Cruising velocity when the way ahead is clear
    ///
    /// Units: cm/s
    pub velocity_cm_s: f64,

    /// Centre distance at or below which cruise velocity is zero
    ///
    /// Units: cm
    pub slow_range_cm: f64,

    /// Centre distance at or above which full cruise velocity is used
    ///
    /// Units: cm
    pub clear_range_cm: f64,

    /// Cruise stops requesting motion once the target is this close
    ///
    /// Units: meters
    pub target_range_threshold_m: f64,
}

/// Parameters for the Avoidance behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct AvoidanceParams {
    pub enabled: bool,

    pub priority: i32,

    pub validity_cycles: u64,

    /// Linear velocity while steering around an obstacle
    ///
    /// Units: cm/s
    pub velocity_cm_s: f64,

    /// Magnitude of the steering rate while avoiding
    ///
    /// Units: rad/s
    pub steering_rad_s: f64,

    /// Priority of the ballistic emergency astern manoeuvre
    pub astern_priority: i32,

    /// Velocity of the emergency astern manoeuvre, zero or negative
    ///
    /// Units: cm/s
    pub astern_velocity_cm_s: f64,

    /// Magnitude of the steering rate while going astern
    ///
    /// Units: rad/s
    pub astern_steering_rad_s: f64,

    /// Number of arbitration cycles an emergency astern manoeuvre lasts
    pub astern_cycles: u64,
}

/// Parameters for the Targeting behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetingParams {
    pub enabled: bool,

    pub priority: i32,

    pub validity_cycles: u64,

    /// Distance from the last target reset to the target, used when no range sensor is fitted
    ///
    /// Units: meters
    pub target_distance_m: f64,

    /// Deceleration starts inside this distance
    ///
    /// Units: meters
    pub approach_range_m: f64,

    /// The robot halts inside this distance
    ///
    /// Units: meters
    pub halt_distance_m: f64,

    /// Velocity at the start of the approach
    ///
    /// Units: cm/s
    pub approach_velocity_cm_s: f64,

    /// Velocity at the end of the approach, just before halting
    ///
    /// Units: cm/s
    pub min_velocity_cm_s: f64,
}

/// Parameters for the Idle behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct IdleParams {
    /// Must be lower than every other behaviour's priority
    pub priority: i32,

    pub validity_cycles: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Params {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        let c = &self.cruise;
        validity("behaviours.cruise", "validity_cycles", c.validity_cycles)?;
        non_negative("behaviours.cruise", "velocity_cm_s", c.velocity_cm_s)?;
        non_negative("behaviours.cruise", "slow_range_cm", c.slow_range_cm)?;
        if !(c.clear_range_cm > c.slow_range_cm) {
            return Err(invalid(
                "behaviours.cruise",
                "clear_range_cm",
                "must be greater than slow_range_cm",
            ));
        }
        non_negative(
            "behaviours.cruise",
            "target_range_threshold_m",
            c.target_range_threshold_m,
        )?;

        let a = &self.avoidance;
        validity("behaviours.avoidance", "validity_cycles", a.validity_cycles)?;
        non_negative("behaviours.avoidance", "steering_rad_s", a.steering_rad_s)?;
        non_negative(
            "behaviours.avoidance",
            "astern_steering_rad_s",
            a.astern_steering_rad_s,
        )?;
        if !(a.astern_velocity_cm_s <= 0.0) {
            return Err(invalid(
                "behaviours.avoidance",
                "astern_velocity_cm_s",
                "must be zero or negative",
            ));
        }
        validity("behaviours.avoidance", "astern_cycles", a.astern_cycles)?;

        let t = &self.targeting;
        validity("behaviours.targeting", "validity_cycles", t.validity_cycles)?;
        positive("behaviours.targeting", "target_distance_m", t.target_distance_m)?;
        non_negative("behaviours.targeting", "halt_distance_m", t.halt_distance_m)?;
        if !(t.approach_range_m > t.halt_distance_m) {
            return Err(invalid(
                "behaviours.targeting",
                "approach_range_m",
                "must be greater than halt_distance_m",
            ));
        }
        non_negative(
            "behaviours.targeting",
            "min_velocity_cm_s",
            t.min_velocity_cm_s,
        )?;
        if t.approach_velocity_cm_s < t.min_velocity_cm_s {
            return Err(invalid(
                "behaviours.targeting",
                "approach_velocity_cm_s",
                "must not be less than min_velocity_cm_s",
            ));
        }

        validity("behaviours.idle", "validity_cycles", self.idle.validity_cycles)?;
        let lowest_other = c
            .priority
            .min(a.priority)
            .min(a.astern_priority)
            .min(t.priority);
        if self.idle.priority >= lowest_other {
            return Err(invalid(
                "behaviours.idle",
                "priority",
                "must be lower than every other behaviour's priority",
            ));
        }

        Ok(())
    }
}

fn validity(section: &'static str, name: &'static str, cycles: u64) -> Result<(), ParamsError> {
    if cycles == 0 {
        Err(invalid(section, name, "must be at least 1"))
    } else {
        Ok(())
    }
}
