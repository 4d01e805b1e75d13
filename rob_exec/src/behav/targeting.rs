//! Targeting behaviour
//!
//! Tracks the distance remaining to the target, either from a range sensor or from the distance
//! travelled since the last target reset. Inside the approach range the velocity falls linearly,
//! inside the halt distance a stop is requested.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};

use super::{MotionRequest, TargetingParams};
use crate::sensors::SensorState;
use comms_if::msg::{BehaviourId, Tick};
use util::maths::clamped_lin_map;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Targeting {
    params: TargetingParams,

    /// Odometer reading at the last target reset
    ///
    /// Units: meters
    reset_odometer_m: f64,

    /// True once the halt distance has been reached
    reached: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Targeting {
    pub fn new(params: &TargetingParams) -> Self {
        Self {
            params: params.clone(),
            reset_odometer_m: 0.0,
            reached: false,
        }
    }

    pub fn params(&self) -> &TargetingParams {
        &self.params
    }

    /// Start a new target, measuring from the given odometer reading.
    pub fn reset(&mut self, odometer_m: f64) {
        info!("Targeting reset at odometer {:.3} m", odometer_m);
        self.reset_odometer_m = odometer_m;
        self.reached = false;
    }

    /// Distance left to the target.
    ///
    /// Units: meters
    pub fn remaining_m(&self, state: &SensorState) -> f64 {
        match state.target_range_m() {
            Some(r) => r,
            None => {
                let travelled_m = state.odometer_m() - self.reset_odometer_m;
                self.params.target_distance_m - travelled_m
            }
        }
    }

    pub fn evaluate(&mut self, state: &SensorState, tick: &Tick) -> Option<MotionRequest> {
        let remaining_m = self.remaining_m(state);

        if tick.is_tock {
            debug!("Targeting: {:.3} m to target", remaining_m);
        }

        let p = &self.params;

        let velocity_cm_s = if remaining_m <= p.halt_distance_m {
            if !self.reached {
                info!("Target reached ({:.3} m remaining), halting", remaining_m);
                self.reached = true;
            }
            0.0
        } else if remaining_m <= p.approach_range_m {
            clamped_lin_map(
                (p.halt_distance_m, p.approach_range_m),
                (p.min_velocity_cm_s, p.approach_velocity_cm_s),
                remaining_m,
            )
        } else {
            return None;
        };

        Some(MotionRequest::new(
            BehaviourId::Targeting,
            p.priority,
            velocity_cm_s,
            0.0,
            p.validity_cycles,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::msg::{PoseEstimate, SensorEvent, SensorId};

    const TICK: Tick = Tick {
        seq: 10,
        is_tock: true,
    };

    fn targeting() -> Targeting {
        Targeting::new(&TargetingParams {
            enabled: true,
            priority: 3,
            validity_cycles: 2,
            target_distance_m: 2.0,
            approach_range_m: 0.5,
            halt_distance_m: 0.1,
            approach_velocity_cm_s: 30.0,
            min_velocity_cm_s: 5.0,
        })
    }

    fn at_odometer(odometer_m: f64) -> SensorState {
        let mut s = SensorState::new();
        s.set_pose(PoseEstimate {
            odometer_m,
            ..Default::default()
        });
        s
    }

    #[test]
    fn test_far_is_silent() {
        assert!(targeting().evaluate(&at_odometer(0.5), &TICK).is_none());
    }

    #[test]
    fn test_decelerate_then_halt() {
        let mut t = targeting();

        // 0.5 m remaining, start of approach
        let r = t.evaluate(&at_odometer(1.5), &TICK).unwrap();
        assert!((r.linear_cm_s - 30.0).abs() < 1e-9);

        // 0.3 m remaining, half way between halt and approach
        let r = t.evaluate(&at_odometer(1.7), &TICK).unwrap();
        assert!((r.linear_cm_s - 17.5).abs() < 1e-9);

        // Inside halt distance
        let r = t.evaluate(&at_odometer(1.95), &TICK).unwrap();
        assert_eq!(r.linear_cm_s, 0.0);
        assert_eq!(r.priority, 3);
    }

    #[test]
    fn test_reset_counter() {
        let mut t = targeting();
        t.reset(1.9);

        assert!((t.remaining_m(&at_odometer(2.4)) - 1.5).abs() < 1e-9);
        assert!(t.evaluate(&at_odometer(2.4), &TICK).is_none());
    }

    #[test]
    fn test_range_sensor_overrides_counter() {
        let mut s = at_odometer(0.0);
        s.update(SensorEvent {
            source: SensorId::TargetRange,
            timestamp_s: 0.0,
            value: 5.0,
            triggered: false,
        });

        let r = targeting().evaluate(&s, &TICK).unwrap();
        assert_eq!(r.linear_cm_s, 0.0);
    }
}
