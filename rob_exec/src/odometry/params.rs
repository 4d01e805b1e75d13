//! Drive geometry

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::f64::consts::PI;
use serde::Deserialize;

use crate::params::{invalid, positive, ParamsError};
use comms_if::msg::Wheel;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Geometry of the differential drive.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Geometry {
    /// Units: millimeters
    pub wheel_diameter_mm: f64,

    /// Distance between the contact points of the two wheels
    ///
    /// Units: millimeters
    pub wheelbase_mm: f64,

    /// Encoder steps in one full wheel rotation
    pub steps_per_rotation: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Geometry {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        positive("geometry", "wheel_diameter_mm", self.wheel_diameter_mm)?;
        positive("geometry", "wheelbase_mm", self.wheelbase_mm)?;
        if self.steps_per_rotation == 0 {
            return Err(invalid("geometry", "steps_per_rotation", "must be at least 1"));
        }
        Ok(())
    }

    /// Units: centimeters
    pub fn circumference_cm(&self) -> f64 {
        PI * self.wheel_diameter_mm / 10.0
    }

    /// Units: centimeters
    pub fn wheelbase_cm(&self) -> f64 {
        self.wheelbase_mm / 10.0
    }

    /// Distance rolled by a wheel over the given number of encoder steps.
    ///
    /// Units: centimeters
    pub fn steps_to_cm(&self, steps: i64) -> f64 {
        steps as f64 * self.circumference_cm() / self.steps_per_rotation as f64
    }

    /// Distance travelled by the robot centre and the change in heading for a pair of wheel
    /// step deltas, indexed by [`Wheel::index`].
    ///
    /// Units: (meters, radians), heading positive to port
    pub fn displacement(&self, deltas: [i64; 2]) -> (f64, f64) {
        let port_cm = self.steps_to_cm(deltas[Wheel::Port.index()]);
        let stbd_cm = self.steps_to_cm(deltas[Wheel::Stbd.index()]);

        let distance_m = 0.5 * (port_cm + stbd_cm) / 100.0;
        let heading_delta_rad = (stbd_cm - port_cm) / self.wheelbase_cm();

        (distance_m, heading_delta_rad)
    }

    /// Wheel velocity targets for a body demand.
    ///
    /// Units: inputs cm/s and rad/s (positive to port), outputs cm/s indexed by [`Wheel::index`]
    pub fn wheel_velocities(&self, linear_cm_s: f64, steering_rad_s: f64) -> [f64; 2] {
        let half_track = 0.5 * steering_rad_s * self.wheelbase_cm();

        let mut v = [0f64; 2];
        v[Wheel::Port.index()] = linear_cm_s - half_track;
        v[Wheel::Stbd.index()] = linear_cm_s + half_track;
        v
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// 100 mm wheels, 200 mm apart, 360 steps per turn.
    pub(crate) fn geometry() -> Geometry {
        Geometry {
            wheel_diameter_mm: 100.0,
            wheelbase_mm: 200.0,
            steps_per_rotation: 360,
        }
    }

    #[test]
    fn test_steps_to_cm() {
        let g = geometry();
        assert!((g.steps_to_cm(360) - g.circumference_cm()).abs() < 1e-12);
        assert!((g.steps_to_cm(-180) + 0.5 * PI * 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_displacement() {
        let g = geometry();

        // Straight ahead one full turn
        let (d, h) = g.displacement([360, 360]);
        assert!((d - PI * 0.1).abs() < 1e-12);
        assert_eq!(h, 0.0);

        // Spin on the spot to port
        let (d, h) = g.displacement([-360, 360]);
        assert!(d.abs() < 1e-12);
        assert!((h - 2.0 * PI * 10.0 / 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_wheel_velocities() {
        let g = geometry();
        assert_eq!(g.wheel_velocities(50.0, 0.0), [50.0, 50.0]);

        let v = g.wheel_velocities(0.0, 1.0);
        assert_eq!(v[Wheel::Port.index()], -10.0);
        assert_eq!(v[Wheel::Stbd.index()], 10.0);
    }
}
