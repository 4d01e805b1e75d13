//! # Bus Messages
//!
//! Every item which is published on the [`MessageBus`](crate::bus::MessageBus) is one variant of
//! [`Event`]. Consumers subscribe to one or more [`EventKind`]s.
//!
//! Units used throughout:
//! - linear velocities are in cm/s,
//! - steering is an angular velocity in rad/s, positive turning to port (anticlockwise),
//! - wheel power is normalised to [-1, 1], positive driving ahead,
//! - timestamps are seconds since the producer's epoch and must be monotonic per source.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A clock pulse.
///
/// Published once per clock cycle and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Monotonic sequence number, starting at zero
    pub seq: u64,

    /// True if this tick is also a tock (every Nth tick)
    pub is_tock: bool,
}

/// A normalised sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    /// The logical sensor which produced the reading
    pub source: SensorId,

    /// Time of the reading in seconds
    pub timestamp_s: f64,

    /// The measured value. Distances in cm for infrared and range sensors, 0 or 1 for bumpers,
    /// heading in radians for the IMU.
    pub value: f64,

    /// True if the (debounced) reading is past the sensor's trigger threshold
    pub triggered: bool,
}

/// The single output of arbitration for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArbitratedCommand {
    /// Demanded linear velocity of the robot body
    ///
    /// Units: cm/s
    pub linear_cm_s: f64,

    /// Demanded angular velocity of the robot body, positive to port
    ///
    /// Units: rad/s
    pub steering_rad_s: f64,

    /// The behaviour whose request won arbitration
    pub source: BehaviourId,

    /// The arbitration cycle this command was produced on
    pub cycle: u64,

    /// True if this command came from a ballistic request
    pub ballistic: bool,

    /// True if the wheels must stop at once, without ramping down. A zero velocity demand
    /// from a behaviour is not a stop.
    pub stop: bool,
}

/// The state of a single wheel's control loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelState {
    /// Which wheel this is
    pub wheel: Wheel,

    /// Target velocity of the wheel
    ///
    /// Units: cm/s
    pub target_cm_s: f64,

    /// Velocity measured from the encoder delta over the last step
    ///
    /// Units: cm/s
    pub measured_cm_s: f64,

    /// The PID integral accumulator
    pub integral: f64,

    /// The PID derivative term from the last step
    pub derivative: f64,

    /// The power output on the last step, after slew limiting and clamping
    pub last_power: f64,

    /// The absolute encoder step count
    pub steps: i64,

    /// True if the encoder could not be read on the last step
    pub stale: bool,
}

/// Snapshot of both wheels, published once per motor control step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelStates {
    /// Motor control step number
    pub step: u64,

    pub port: WheelState,

    pub stbd: WheelState,
}

/// The running pose estimate from odometry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Position along the initial heading
    ///
    /// Units: meters
    pub x_m: f64,

    /// Position to port of the initial heading
    ///
    /// Units: meters
    pub y_m: f64,

    /// Heading relative to the initial heading, in [-pi, pi)
    ///
    /// Units: radians
    pub heading_rad: f64,

    /// Total distance travelled by the robot centre, always increasing
    ///
    /// Units: meters
    pub odometer_m: f64,

    /// Signed linear velocity over the last update
    ///
    /// Units: cm/s
    pub velocity_cm_s: f64,
}

/// A fault which has been raised by a component.
///
/// Every recoverable error which changes the output of a component shall be published as a
/// fault so that telemetry consumers can see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultReport {
    /// The category of fault
    pub kind: FaultKind,

    /// The component which raised the fault
    pub source: String,

    /// Human readable description
    pub detail: String,

    /// True if the fault has escalated to a safety halt
    pub escalated: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Every item that may be published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A clock tick (or tock)
    Tick(Tick),

    /// A debounced sensor reading
    Sensor(SensorEvent),

    /// An arbitration result
    Command(ArbitratedCommand),

    /// A wheel state snapshot
    Wheels(WheelStates),

    /// A pose estimate from odometry
    Pose(PoseEstimate),

    /// A fault report
    Fault(FaultReport),

    /// Global halt, zeroes all motion requests and wheel outputs
    Halt(HaltCause),

    /// Clear a previous halt with the given cause
    Resume(HaltCause),
}

/// The kind of an [`Event`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Tick,
    Sensor,
    Command,
    Wheels,
    Pose,
    Fault,
    Halt,
    Resume,
}

/// Logical sensor identifiers.
///
/// The mapping from a sensor to the behaviours which read it is fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorId {
    InfraredPortSide,
    InfraredPort,
    InfraredCntr,
    InfraredStbd,
    InfraredStbdSide,
    BumperPort,
    BumperCntr,
    BumperStbd,
    Heading,
    TargetRange,
}

/// Which side of the robot a sensor looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Port,
    Centre,
    Stbd,
}

/// The closed set of behaviours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviourId {
    Cruise,
    Avoidance,
    Targeting,
    Idle,
}

/// The two driven wheels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wheel {
    Port,
    Stbd,
}

/// Categories of fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// A sensor has not been refreshed within its timeout
    SensorStale,

    /// The arbitrator ran out of time collecting requests
    ArbitrationTimeout,

    /// Encoder feedback could not be read
    MotorFeedback,

    /// No fresh command reached motor control within its timeout
    CommandStale,

    /// A bus queue overflowed and dropped events
    BusOverflow,
}

/// The reason for a global halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaltCause {
    /// Requested by an operator or the executable
    Operator,

    /// Prolonged stale sensor data
    SensorStale,

    /// Prolonged loss of motor feedback
    MotorFeedback,

    /// The executable is shutting down
    Shutdown,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Event {
    /// Get the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Tick(_) => EventKind::Tick,
            Event::Sensor(_) => EventKind::Sensor,
            Event::Command(_) => EventKind::Command,
            Event::Wheels(_) => EventKind::Wheels,
            Event::Pose(_) => EventKind::Pose,
            Event::Fault(_) => EventKind::Fault,
            Event::Halt(_) => EventKind::Halt,
            Event::Resume(_) => EventKind::Resume,
        }
    }
}

impl SensorId {
    /// All infrared sensors, port to starboard.
    pub const INFRAREDS: [SensorId; 5] = [
        SensorId::InfraredPortSide,
        SensorId::InfraredPort,
        SensorId::InfraredCntr,
        SensorId::InfraredStbd,
        SensorId::InfraredStbdSide,
    ];

    /// All bumpers, port to starboard.
    pub const BUMPERS: [SensorId; 3] = [
        SensorId::BumperPort,
        SensorId::BumperCntr,
        SensorId::BumperStbd,
    ];

    pub fn is_infrared(&self) -> bool {
        Self::INFRAREDS.contains(self)
    }

    pub fn is_bumper(&self) -> bool {
        Self::BUMPERS.contains(self)
    }

    /// The side of the robot this sensor faces, or `None` for sensors with no direction.
    pub fn side(&self) -> Option<Side> {
        match self {
            SensorId::InfraredPortSide | SensorId::InfraredPort | SensorId::BumperPort => {
                Some(Side::Port)
            }
            SensorId::InfraredCntr | SensorId::BumperCntr => Some(Side::Centre),
            SensorId::InfraredStbd | SensorId::InfraredStbdSide | SensorId::BumperStbd => {
                Some(Side::Stbd)
            }
            SensorId::Heading | SensorId::TargetRange => None,
        }
    }
}

impl BehaviourId {
    pub const ALL: [BehaviourId; 4] = [
        BehaviourId::Cruise,
        BehaviourId::Avoidance,
        BehaviourId::Targeting,
        BehaviourId::Idle,
    ];
}

impl Wheel {
    pub const ALL: [Wheel; 2] = [Wheel::Port, Wheel::Stbd];

    /// Index of this wheel in `[port, stbd]` arrays.
    pub fn index(&self) -> usize {
        match self {
            Wheel::Port => 0,
            Wheel::Stbd => 1,
        }
    }
}

impl ArbitratedCommand {
    /// A command which stops the robot immediately.
    pub fn stop(cycle: u64) -> Self {
        Self {
            linear_cm_s: 0.0,
            steering_rad_s: 0.0,
            source: BehaviourId::Idle,
            cycle,
            ballistic: false,
            stop: true,
        }
    }

    /// True if this command is an immediate stop.
    pub fn is_stop(&self) -> bool {
        self.stop
    }

    /// True if this command demands no motion, whether as a stop or as a zero velocity demand.
    pub fn is_still(&self) -> bool {
        self.linear_cm_s == 0.0 && self.steering_rad_s == 0.0
    }
}

impl WheelState {
    /// A zeroed state for the given wheel.
    pub fn new(wheel: Wheel) -> Self {
        Self {
            wheel,
            target_cm_s: 0.0,
            measured_cm_s: 0.0,
            integral: 0.0,
            derivative: 0.0,
            last_power: 0.0,
            steps: 0,
            stale: false,
        }
    }
}

impl HaltCause {
    /// The fault kind which escalates to this cause, if any.
    pub fn from_fault(kind: FaultKind) -> Option<Self> {
        match kind {
            FaultKind::SensorStale => Some(HaltCause::SensorStale),
            FaultKind::MotorFeedback => Some(HaltCause::MotorFeedback),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sensor_sides() {
        assert_eq!(SensorId::InfraredPortSide.side(), Some(Side::Port));
        assert_eq!(SensorId::BumperCntr.side(), Some(Side::Centre));
        assert_eq!(SensorId::InfraredStbdSide.side(), Some(Side::Stbd));
        assert_eq!(SensorId::Heading.side(), None);
        assert!(SensorId::BumperStbd.is_bumper());
        assert!(!SensorId::BumperStbd.is_infrared());
    }

    #[test]
    fn test_sensor_id_names() {
        let json = serde_json::to_string(&SensorId::InfraredCntr).unwrap();
        assert_eq!(json, "\"infrared_cntr\"");
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(Event::Tick(Tick { seq: 0, is_tock: true }).kind(), EventKind::Tick);
        assert_eq!(Event::Halt(HaltCause::Operator).kind(), EventKind::Halt);
        assert!(ArbitratedCommand::stop(3).is_stop());
        assert!(ArbitratedCommand::stop(3).is_still());
    }

    #[test]
    fn test_zero_demand_is_not_stop() {
        let c = ArbitratedCommand {
            stop: false,
            source: BehaviourId::Cruise,
            ..ArbitratedCommand::stop(4)
        };
        assert!(c.is_still());
        assert!(!c.is_stop());
    }
}
