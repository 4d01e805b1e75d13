//! # Simulated robot
//!
//! A simple kinematic simulation of the robot so that the whole stack can run without hardware.
//!
//! [`SimDrive`] implements the actuation and encoder boundaries. Each power write advances the
//! simulation by one fixed step: the wheel speeds follow the demanded power through a first order
//! lag, the encoders count whole steps of the distance rolled and the body moves as a
//! differential drive.
//!
//! [`SimWorld`] creates sensor adapters which observe the same simulated robot: a single wall
//! perpendicular to the initial heading and a point target.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::sync::{Arc, Mutex, MutexGuard};
use log::{debug, info};
use nalgebra::{Rotation2, Vector2};
use serde::Deserialize;

// Internal
use crate::{
    motor_ctrl::{EncoderSource, MotorCtrlError, MotorDriver},
    odometry::Geometry,
    params::{invalid, non_negative, positive, ParamsError},
    sensors::{AdapterSpec, Capability, SensorAdapter, SensorError, SensorReading},
};
use comms_if::msg::{SensorId, Wheel};
use util::maths::{clamp, clamp_abs, wrap_pi};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Beam direction of each infrared channel relative to the robot's heading, positive to port.
const INFRARED_BEAMS: [(SensorId, f64); 5] = [
    (SensorId::InfraredPortSide, FRAC_PI_2),
    (SensorId::InfraredPort, FRAC_PI_4),
    (SensorId::InfraredCntr, 0.0),
    (SensorId::InfraredStbd, -FRAC_PI_4),
    (SensorId::InfraredStbdSide, -FRAC_PI_2),
];

/// Bumper contacts more than this far off the nose register on the side bumpers.
///
/// Units: radians
const CENTRE_BUMPER_HALF_ARC_RAD: f64 = 0.5;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters of the simulation.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Distance from the start position to a wall ahead, or no wall
    ///
    /// Units: meters
    pub wall_distance_m: Option<f64>,

    /// Position of the target in the start frame
    ///
    /// Units: meters
    pub target_x_m: f64,
    pub target_y_m: f64,

    /// Time constant of the wheel speed response to a power change
    ///
    /// Units: seconds
    pub motor_time_const_s: f64,

    /// Wheel speed at full power
    ///
    /// Units: cm/s
    pub max_wheel_speed_cm_s: f64,

    /// Distance from the robot centre to its front edge
    ///
    /// Units: cm
    pub robot_radius_cm: f64,

    /// Maximum distance reported by the simulated infrared sensors
    ///
    /// Units: cm
    pub infrared_max_range_cm: f64,
}

/// The true state of the simulated robot.
#[derive(Debug, Clone)]
pub struct SimTruth {
    /// Units: meters
    pub position_m: Vector2<f64>,

    /// Units: radians
    pub heading_rad: f64,

    /// Units: cm/s
    pub wheel_speeds_cm_s: [f64; 2],

    /// Absolute encoder counts
    pub steps: [i64; 2],

    /// Fractional steps not yet counted
    step_remainders: [f64; 2],

    /// True while the robot is pressed against the wall
    pub in_contact: bool,

    /// Simulated time
    ///
    /// Units: seconds
    pub time_s: f64,

    /// Number of upcoming encoder reads which will fail
    failed_reads: u64,
}

/// Simulated motors and encoders. Clones share the same robot.
#[derive(Clone)]
pub struct SimDrive {
    params: Params,
    geometry: Geometry,

    /// Simulation step per power write
    ///
    /// Units: seconds
    step_s: f64,

    truth: Arc<Mutex<SimTruth>>,
}

/// Creates sensor adapters observing a [`SimDrive`]'s robot.
#[derive(Clone)]
pub struct SimWorld {
    params: Params,
    truth: Arc<Mutex<SimTruth>>,
}

/// A sensor adapter reading the simulated world.
pub struct SimAdapter {
    name: String,
    capability: Capability,
    world: SimWorld,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Params {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        positive("sim", "motor_time_const_s", self.motor_time_const_s)?;
        positive("sim", "max_wheel_speed_cm_s", self.max_wheel_speed_cm_s)?;
        non_negative("sim", "robot_radius_cm", self.robot_radius_cm)?;
        positive("sim", "infrared_max_range_cm", self.infrared_max_range_cm)?;

        if let Some(w) = self.wall_distance_m {
            if !(w.is_finite() && w * 100.0 > self.robot_radius_cm) {
                return Err(invalid(
                    "sim",
                    "wall_distance_m",
                    "the robot must start clear of the wall",
                ));
            }
        }

        Ok(())
    }
}

impl Default for SimTruth {
    fn default() -> Self {
        Self {
            position_m: Vector2::zeros(),
            heading_rad: 0.0,
            wheel_speeds_cm_s: [0.0; 2],
            steps: [0; 2],
            step_remainders: [0.0; 2],
            in_contact: false,
            time_s: 0.0,
            failed_reads: 0,
        }
    }
}

impl SimDrive {
    /// Create a new simulated drive, with the robot at the origin facing along +x.
    pub fn new(params: &Params, geometry: &Geometry, step_s: f64) -> Self {
        info!(
            "Simulated drive created, {} s step, wall {}",
            step_s,
            match params.wall_distance_m {
                Some(w) => format!("at {:.2} m", w),
                None => "absent".into(),
            }
        );

        Self {
            params: params.clone(),
            geometry: *geometry,
            step_s,
            truth: Arc::new(Mutex::new(SimTruth::default())),
        }
    }

    /// The world the drive moves in, for creating sensor adapters.
    pub fn world(&self) -> SimWorld {
        SimWorld {
            params: self.params.clone(),
            truth: self.truth.clone(),
        }
    }

    /// A copy of the true state.
    pub fn truth(&self) -> SimTruth {
        self.lock().clone()
    }

    /// Make the next `n` encoder reads fail.
    pub fn inject_encoder_dropout(&self, n: u64) {
        debug!("Injecting {} encoder read failures", n);
        self.lock().failed_reads = n;
    }

    /// Advance the simulation by one step with the given powers.
    fn advance(&self, powers: &[f64; 2]) {
        let dt = self.step_s;
        let alpha = 1.0 - (-dt / self.params.motor_time_const_s).exp();
        let steps_per_cm = self.geometry.steps_per_rotation as f64 / self.geometry.circumference_cm();

        let mut truth = self.lock();
        let mut rolled_cm = [0f64; 2];

        for w in Wheel::ALL.iter() {
            let i = w.index();

            let target = clamp_abs(&powers[i], &1.0) * self.params.max_wheel_speed_cm_s;
            truth.wheel_speeds_cm_s[i] += (target - truth.wheel_speeds_cm_s[i]) * alpha;
            rolled_cm[i] = truth.wheel_speeds_cm_s[i] * dt;

            // Count whole steps, keeping the fraction for later
            let counted = truth.step_remainders[i] + rolled_cm[i] * steps_per_cm;
            let whole = counted.trunc();
            truth.steps[i] += whole as i64;
            truth.step_remainders[i] = counted - whole;
        }

        let port = rolled_cm[Wheel::Port.index()];
        let stbd = rolled_cm[Wheel::Stbd.index()];
        let distance_m = 0.5 * (port + stbd) / 100.0;
        let heading_delta = (stbd - port) / self.geometry.wheelbase_cm();

        let mid = Rotation2::new(truth.heading_rad + 0.5 * heading_delta);
        truth.position_m += mid * Vector2::new(distance_m, 0.0);
        truth.heading_rad = wrap_pi(truth.heading_rad + heading_delta);
        truth.time_s += dt;

        // The wall stops the body, the wheels slip
        truth.in_contact = false;
        if let Some(w) = self.params.wall_distance_m {
            let limit_m = w - self.params.robot_radius_cm / 100.0;
            if truth.position_m.x >= limit_m {
                truth.position_m.x = limit_m;
                truth.in_contact = true;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimTruth> {
        lock_truth(&self.truth)
    }
}

impl MotorDriver for SimDrive {
    fn write_powers(&mut self, powers: &[f64; 2]) -> Result<(), MotorCtrlError> {
        if powers.iter().any(|p| !p.is_finite()) {
            return Err(MotorCtrlError::Driver(format!(
                "non-finite power demand {:?}",
                powers
            )));
        }

        self.advance(powers);
        Ok(())
    }
}

impl EncoderSource for SimDrive {
    fn read_steps(&mut self) -> Result<[i64; 2], MotorCtrlError> {
        let mut truth = self.lock();

        if truth.failed_reads > 0 {
            truth.failed_reads -= 1;
            return Err(MotorCtrlError::Feedback("simulated encoder dropout".into()));
        }

        Ok(truth.steps)
    }
}

impl SimWorld {
    /// Create the adapter for a configured spec.
    pub fn adapter(&self, spec: &AdapterSpec) -> Box<dyn SensorAdapter> {
        Box::new(SimAdapter {
            name: spec.name.clone(),
            capability: spec.kind,
            world: self.clone(),
        })
    }

    /// Distance from the front of the robot to the wall along a beam, clamped to the maximum
    /// infrared range.
    ///
    /// Units: cm
    fn beam_distance_cm(&self, truth: &SimTruth, beam_rad: f64) -> f64 {
        let max = self.params.infrared_max_range_cm;

        let wall_m = match self.params.wall_distance_m {
            Some(w) => w,
            None => return max,
        };

        let dir = Rotation2::new(truth.heading_rad + beam_rad) * Vector2::new(1.0, 0.0);
        if dir.x <= 1e-6 {
            return max;
        }

        let along_m = (wall_m - truth.position_m.x) / dir.x;
        clamp(&(along_m * 100.0 - self.params.robot_radius_cm), &0.0, &max)
    }

    /// The bumper which is pressed, if any.
    fn pressed_bumper(&self, truth: &SimTruth) -> Option<SensorId> {
        if !truth.in_contact {
            return None;
        }

        // The wall lies at -heading relative to the robot's nose
        let wall_bearing = -truth.heading_rad;
        if wall_bearing.abs() >= FRAC_PI_2 {
            None
        } else if wall_bearing > CENTRE_BUMPER_HALF_ARC_RAD {
            Some(SensorId::BumperPort)
        } else if wall_bearing < -CENTRE_BUMPER_HALF_ARC_RAD {
            Some(SensorId::BumperStbd)
        } else {
            Some(SensorId::BumperCntr)
        }
    }

    fn read(&self, capability: Capability, now_s: f64) -> Vec<SensorReading> {
        let truth = lock_truth(&self.truth).clone();
        let reading = |id, value| SensorReading {
            id,
            timestamp_s: now_s,
            value,
        };

        match capability {
            Capability::Infrared => INFRARED_BEAMS
                .iter()
                .map(|(id, beam)| reading(*id, self.beam_distance_cm(&truth, *beam)))
                .collect(),
            Capability::Bumper => {
                let pressed = self.pressed_bumper(&truth);
                SensorId::BUMPERS
                    .iter()
                    .map(|id| reading(*id, if pressed == Some(*id) { 1.0 } else { 0.0 }))
                    .collect()
            }
            Capability::Imu => vec![reading(SensorId::Heading, truth.heading_rad)],
            Capability::TargetRange => {
                let target = Vector2::new(self.params.target_x_m, self.params.target_y_m);
                let range_cm = (target - truth.position_m).norm() * 100.0;
                vec![reading(SensorId::TargetRange, range_cm)]
            }
        }
    }
}

impl SensorAdapter for SimAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn sensor_ids(&self) -> Vec<SensorId> {
        match self.capability {
            Capability::Infrared => INFRARED_BEAMS.iter().map(|(id, _)| *id).collect(),
            Capability::Bumper => SensorId::BUMPERS.to_vec(),
            Capability::Imu => vec![SensorId::Heading],
            Capability::TargetRange => vec![SensorId::TargetRange],
        }
    }

    fn poll(&mut self, now_s: f64) -> Result<Vec<SensorReading>, SensorError> {
        if !now_s.is_finite() {
            return Err(SensorError::ReadError {
                adapter: self.name.clone(),
                reason: format!("invalid poll time {}", now_s),
            });
        }

        Ok(self.world.read(self.capability, now_s))
    }
}

fn lock_truth(truth: &Arc<Mutex<SimTruth>>) -> MutexGuard<'_, SimTruth> {
    match truth.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::odometry::params::test::geometry;

    pub(crate) fn params() -> Params {
        Params {
            wall_distance_m: Some(1.0),
            target_x_m: 3.0,
            target_y_m: 0.0,
            motor_time_const_s: 0.1,
            max_wheel_speed_cm_s: 60.0,
            robot_radius_cm: 10.0,
            infrared_max_range_cm: 150.0,
        }
    }

    fn run(drive: &mut SimDrive, powers: [f64; 2], steps: usize) {
        for _ in 0..steps {
            drive.write_powers(&powers).unwrap();
        }
    }

    #[test]
    fn test_straight_drive() {
        let mut d = SimDrive::new(&Params { wall_distance_m: None, ..params() }, &geometry(), 0.05);
        run(&mut d, [0.5, 0.5], 40);

        let t = d.truth();
        assert!((t.wheel_speeds_cm_s[0] - 30.0).abs() < 0.1);
        assert_eq!(t.steps[0], t.steps[1]);
        assert!(t.steps[0] > 0);
        assert!(t.position_m.x > 0.4);
        assert!(t.position_m.y.abs() < 1e-12);
        assert!((t.time_s - 2.0).abs() < 1e-9);

        // The encoder counts agree with the distance rolled, to within a step
        let counted_cm = geometry().steps_to_cm(t.steps[0]);
        assert!((counted_cm - t.position_m.x * 100.0).abs() <= geometry().steps_to_cm(1));
    }

    #[test]
    fn test_spin_to_port() {
        let mut d = SimDrive::new(&params(), &geometry(), 0.05);
        run(&mut d, [-0.2, 0.2], 10);

        let t = d.truth();
        assert!(t.heading_rad > 0.0);
        assert!(t.position_m.norm() < 1e-9);
        assert!(t.steps[0] < 0 && t.steps[1] > 0);
    }

    #[test]
    fn test_wall_contact_and_sensors() {
        let mut d = SimDrive::new(&params(), &geometry(), 0.05);
        let world = d.world();

        let mut ir = world.adapter(&AdapterSpec {
            name: "ir".into(),
            kind: Capability::Infrared,
        });
        let mut bump = world.adapter(&AdapterSpec {
            name: "bump".into(),
            kind: Capability::Bumper,
        });

        // Wall 100 cm away, robot front at 10 cm: centre beam reads 90 cm, the 45 degree beams
        // further and the side beams see nothing
        let r = ir.poll(0.0).unwrap();
        let centre = r.iter().find(|r| r.id == SensorId::InfraredCntr).unwrap();
        assert!((centre.value - 90.0).abs() < 1e-9);
        let port = r.iter().find(|r| r.id == SensorId::InfraredPort).unwrap();
        assert!(port.value > 90.0);
        let side = r.iter().find(|r| r.id == SensorId::InfraredPortSide).unwrap();
        assert_eq!(side.value, 150.0);

        assert!(bump.poll(0.0).unwrap().iter().all(|r| r.value == 0.0));

        // Drive into the wall
        run(&mut d, [1.0, 1.0], 100);
        let t = d.truth();
        assert!(t.in_contact);
        assert!((t.position_m.x - 0.9).abs() < 1e-9);

        let r = bump.poll(1.0).unwrap();
        let pressed: Vec<SensorId> = r.iter().filter(|r| r.value > 0.5).map(|r| r.id).collect();
        assert_eq!(pressed, vec![SensorId::BumperCntr]);

        let centre = ir.poll(1.0).unwrap()[2];
        assert_eq!(centre.id, SensorId::InfraredCntr);
        assert!(centre.value.abs() < 1e-6);
    }

    #[test]
    fn test_target_range_and_heading() {
        let d = SimDrive::new(&params(), &geometry(), 0.05);
        let world = d.world();

        let mut range = world.adapter(&AdapterSpec {
            name: "range".into(),
            kind: Capability::TargetRange,
        });
        let mut imu = world.adapter(&AdapterSpec {
            name: "imu".into(),
            kind: Capability::Imu,
        });

        assert!((range.poll(0.0).unwrap()[0].value - 300.0).abs() < 1e-9);
        assert_eq!(imu.poll(0.0).unwrap()[0].value, 0.0);
        assert_eq!(imu.sensor_ids(), vec![SensorId::Heading]);
    }

    #[test]
    fn test_encoder_dropout() {
        let mut d = SimDrive::new(&params(), &geometry(), 0.05);
        d.inject_encoder_dropout(2);

        assert!(matches!(d.read_steps(), Err(MotorCtrlError::Feedback(_))));
        assert!(d.read_steps().is_err());
        assert_eq!(d.read_steps(), Ok([0, 0]));
    }

    #[test]
    fn test_non_finite_power_rejected() {
        let mut d = SimDrive::new(&params(), &geometry(), 0.05);
        assert!(d.write_powers(&[std::f64::NAN, 0.0]).is_err());
    }
}
