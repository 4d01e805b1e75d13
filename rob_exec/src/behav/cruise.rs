//! Cruise behaviour
//!
//! Drives straight ahead while nothing is near. The cruising velocity is scaled down linearly as
//! the centre infrared distance falls from the clear range to the slow range.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use super::{CruiseParams, MotionRequest};
use crate::sensors::SensorState;
use comms_if::msg::{BehaviourId, SensorId, Tick};
use util::maths::clamped_lin_map;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Cruise {
    params: CruiseParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Cruise {
    pub fn new(params: &CruiseParams) -> Self {
        Self {
            params: params.clone(),
        }
    }

    pub fn params(&self) -> &CruiseParams {
        &self.params
    }

    pub fn evaluate(&mut self, state: &SensorState, _tick: &Tick) -> Option<MotionRequest> {
        // Near-field obstacles are left to avoidance
        if state.triggered_bumper().is_some() || state.any_infrared_triggered() {
            return None;
        }

        // Close to the target, leave it to targeting
        if let Some(range_m) = state.target_range_m() {
            if range_m <= self.params.target_range_threshold_m {
                return None;
            }
        }

        // No centre reading, no cruising
        let centre_cm = state.distance_cm(SensorId::InfraredCntr)?;

        let velocity_cm_s = clamped_lin_map(
            (self.params.slow_range_cm, self.params.clear_range_cm),
            (0.0, self.params.velocity_cm_s),
            centre_cm,
        );

        Some(MotionRequest::new(
            BehaviourId::Cruise,
            self.params.priority,
            velocity_cm_s,
            0.0,
            self.params.validity_cycles,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::msg::SensorEvent;

    const TICK: Tick = Tick {
        seq: 1,
        is_tock: false,
    };

    fn cruise() -> Cruise {
        Cruise::new(&CruiseParams {
            enabled: true,
            priority: 1,
            validity_cycles: 2,
            velocity_cm_s: 50.0,
            slow_range_cm: 20.0,
            clear_range_cm: 100.0,
            target_range_threshold_m: 0.5,
        })
    }

    fn state_with(id: SensorId, value: f64, triggered: bool) -> SensorState {
        let mut s = SensorState::new();
        s.update(SensorEvent {
            source: id,
            timestamp_s: 0.0,
            value,
            triggered,
        });
        s
    }

    #[test]
    fn test_remap() {
        let mut c = cruise();

        let r = c
            .evaluate(&state_with(SensorId::InfraredCntr, 150.0, false), &TICK)
            .unwrap();
        assert_eq!(r.linear_cm_s, 50.0);
        assert_eq!(r.priority, 1);

        let r = c
            .evaluate(&state_with(SensorId::InfraredCntr, 60.0, false), &TICK)
            .unwrap();
        assert!((r.linear_cm_s - 25.0).abs() < 1e-9);

        let r = c
            .evaluate(&state_with(SensorId::InfraredCntr, 10.0, false), &TICK)
            .unwrap();
        assert_eq!(r.linear_cm_s, 0.0);
    }

    #[test]
    fn test_silent_near_obstacle_or_target() {
        let mut c = cruise();

        assert!(c.evaluate(&SensorState::new(), &TICK).is_none());
        assert!(c
            .evaluate(&state_with(SensorId::InfraredCntr, 15.0, true), &TICK)
            .is_none());
        assert!(c
            .evaluate(&state_with(SensorId::BumperCntr, 1.0, true), &TICK)
            .is_none());

        let mut s = state_with(SensorId::InfraredCntr, 150.0, false);
        s.update(SensorEvent {
            source: SensorId::TargetRange,
            timestamp_s: 0.0,
            value: 40.0,
            triggered: false,
        });
        assert!(c.evaluate(&s, &TICK).is_none());
    }
}
