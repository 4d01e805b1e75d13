//! Avoidance behaviour
//!
//! Steers away from obstacles seen by the infrared sensors. A bumper contact raises a ballistic
//! emergency astern request which backs away while turning the nose away from the contact.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;

use super::{AvoidanceParams, MotionRequest};
use crate::sensors::SensorState;
use comms_if::msg::{BehaviourId, SensorId, Side, Tick};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Avoidance {
    params: AvoidanceParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Avoidance {
    pub fn new(params: &AvoidanceParams) -> Self {
        Self {
            params: params.clone(),
        }
    }

    pub fn params(&self) -> &AvoidanceParams {
        &self.params
    }

    pub fn evaluate(&mut self, state: &SensorState, _tick: &Tick) -> Option<MotionRequest> {
        if let Some(bumper) = state.triggered_bumper() {
            return Some(self.astern(bumper));
        }

        let port = state.infrared_triggered_on(Side::Port);
        let stbd = state.infrared_triggered_on(Side::Stbd);
        let centre = state.is_triggered(SensorId::InfraredCntr);

        if !(port || stbd || centre) {
            return None;
        }

        let turn = self.params.steering_rad_s;
        let steering_rad_s = match (port, stbd) {
            (true, false) => -turn,
            (false, true) => turn,
            _ => {
                // Blocked ahead or on both sides, turn toward the side with more room
                let room_port = state.nearest_on(Side::Port).unwrap_or(std::f64::INFINITY);
                let room_stbd = state.nearest_on(Side::Stbd).unwrap_or(std::f64::INFINITY);
                if room_port >= room_stbd {
                    turn
                } else {
                    -turn
                }
            }
        };

        Some(MotionRequest::new(
            BehaviourId::Avoidance,
            self.params.priority,
            self.params.velocity_cm_s,
            steering_rad_s,
            self.params.validity_cycles,
        ))
    }

    fn astern(&self, bumper: SensorId) -> MotionRequest {
        let turn = self.params.astern_steering_rad_s;

        // Going astern, a negative rate swings the nose to starboard
        let steering_rad_s = match bumper.side() {
            Some(Side::Port) => -turn,
            Some(Side::Stbd) => turn,
            _ => 0.0,
        };

        debug!("Bumper {:?} pressed, requesting emergency astern", bumper);

        MotionRequest::new(
            BehaviourId::Avoidance,
            self.params.astern_priority,
            self.params.astern_velocity_cm_s,
            steering_rad_s,
            self.params.astern_cycles,
        )
        .into_ballistic()
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

    fn avoidance() -> Avoidance {
        Avoidance::new(&AvoidanceParams {
            enabled: true,
            priority: 5,
            validity_cycles: 2,
            velocity_cm_s: 0.0,
            steering_rad_s: 0.8,
            astern_priority: 10,
            astern_velocity_cm_s: -20.0,
            astern_steering_rad_s: 0.5,
            astern_cycles: 8,
        })
    }

    fn state(readings: &[(SensorId, f64, bool)]) -> SensorState {
        let mut s = SensorState::new();
        for (id, value, triggered) in readings {
            s.update(SensorEvent {
                source: *id,
                timestamp_s: 0.0,
                value: *value,
                triggered: *triggered,
            });
        }
        s
    }

    #[test]
    fn test_clear_is_silent() {
        let s = state(&[(SensorId::InfraredCntr, 120.0, false)]);
        assert!(avoidance().evaluate(&s, &TICK).is_none());
    }

    #[test]
    fn test_steer_away() {
        let mut a = avoidance();

        let r = a
            .evaluate(&state(&[(SensorId::InfraredPort, 15.0, true)]), &TICK)
            .unwrap();
        assert!(r.steering_rad_s < 0.0);
        assert_eq!(r.linear_cm_s, 0.0);
        assert_eq!(r.priority, 5);
        assert!(!r.ballistic);

        let r = a
            .evaluate(&state(&[(SensorId::InfraredStbdSide, 15.0, true)]), &TICK)
            .unwrap();
        assert!(r.steering_rad_s > 0.0);

        // Centre blocked, more room to starboard
        let r = a
            .evaluate(
                &state(&[
                    (SensorId::InfraredCntr, 15.0, true),
                    (SensorId::InfraredPort, 40.0, false),
                    (SensorId::InfraredStbd, 90.0, false),
                ]),
                &TICK,
            )
            .unwrap();
        assert!(r.steering_rad_s < 0.0);
    }

    #[test]
    fn test_bumper_astern_is_ballistic() {
        let mut a = avoidance();

        let r = a
            .evaluate(
                &state(&[
                    (SensorId::BumperPort, 1.0, true),
                    (SensorId::InfraredPort, 5.0, true),
                ]),
                &TICK,
            )
            .unwrap();
        assert!(r.ballistic);
        assert_eq!(r.priority, 10);
        assert_eq!(r.linear_cm_s, -20.0);
        assert!(r.steering_rad_s < 0.0);
        assert_eq!(r.validity_cycles, 8);
    }
}
