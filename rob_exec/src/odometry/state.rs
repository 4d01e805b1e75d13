//! Running pose estimate

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::{Rotation2, Vector2};

use super::Geometry;
use comms_if::msg::PoseEstimate;
use util::maths::wrap_pi;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Dead-reckoning odometry.
#[derive(Debug, Clone)]
pub struct Odometry {
    geometry: Geometry,

    /// Position in the start frame
    ///
    /// Units: meters
    position_m: Vector2<f64>,

    /// Units: radians, in [-pi, pi)
    heading_rad: f64,

    /// Units: meters
    odometer_m: f64,

    /// Units: cm/s
    velocity_cm_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Odometry {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            position_m: Vector2::zeros(),
            heading_rad: 0.0,
            odometer_m: 0.0,
            velocity_cm_s: 0.0,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Integrate one pair of wheel step deltas.
    ///
    /// Returns the distance travelled by the robot centre and the heading change over the
    /// update, which depend only on the deltas and the geometry.
    ///
    /// Units: (meters, radians)
    pub fn update(&mut self, deltas: [i64; 2], elapsed_s: f64) -> (f64, f64) {
        let (distance_m, heading_delta_rad) = self.geometry.displacement(deltas);

        // Move along the mean heading of the update
        let mid_heading = Rotation2::new(self.heading_rad + 0.5 * heading_delta_rad);
        self.position_m += mid_heading * Vector2::new(distance_m, 0.0);

        self.heading_rad = wrap_pi(self.heading_rad + heading_delta_rad);
        self.odometer_m += distance_m.abs();

        self.velocity_cm_s = if elapsed_s > 0.0 {
            distance_m * 100.0 / elapsed_s
        } else {
            0.0
        };

        trace!(
            "Odometry: ({:.3}, {:.3}) m, {:.3} rad, {:.3} m travelled",
            self.position_m.x,
            self.position_m.y,
            self.heading_rad,
            self.odometer_m
        );

        (distance_m, heading_delta_rad)
    }

    /// A copy of the current pose estimate.
    pub fn pose(&self) -> PoseEstimate {
        PoseEstimate {
            x_m: self.position_m.x,
            y_m: self.position_m.y,
            heading_rad: self.heading_rad,
            odometer_m: self.odometer_m,
            velocity_cm_s: self.velocity_cm_s,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::odometry::params::test::geometry;
    use std::f64::consts::PI;

    #[test]
    fn test_straight_line() {
        let mut o = Odometry::new(geometry());

        for _ in 0..10 {
            o.update([36, 36], 0.1);
        }

        let p = o.pose();
        assert!((p.x_m - PI * 0.1).abs() < 1e-9);
        assert!(p.y_m.abs() < 1e-12);
        assert_eq!(p.heading_rad, 0.0);
        assert!((p.velocity_cm_s - 10.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn test_update_is_pure_in_deltas() {
        let mut a = Odometry::new(geometry());
        let mut b = Odometry::new(geometry());
        b.update([100, -40], 0.1);

        assert_eq!(a.update([12, 30], 0.1), b.update([12, 30], 0.1));
    }

    #[test]
    fn test_quarter_turn_then_forward() {
        let mut o = Odometry::new(geometry());

        // pi/2 to port on the spot: each wheel rolls 5 pi cm, 180 steps
        o.update([-180, 180], 0.5);
        assert!((o.pose().heading_rad - PI / 2.0).abs() < 1e-9);

        o.update([360, 360], 1.0);
        let p = o.pose();
        assert!(p.x_m.abs() < 1e-9);
        assert!((p.y_m - PI * 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_odometer_counts_reversing() {
        let mut o = Odometry::new(geometry());
        o.update([360, 360], 1.0);
        o.update([-360, -360], 1.0);

        let p = o.pose();
        assert!(p.x_m.abs() < 1e-12);
        assert!((p.odometer_m - 2.0 * PI * 0.1).abs() < 1e-9);
        assert!(p.velocity_cm_s < 0.0);
    }
}
