//! # Sensors module
//!
//! Raw readings enter the stack through [`SensorAdapter`]s, which are collected at startup into a
//! [`SensorRegistry`] keyed by capability. The integrated front sensor aggregator ([`Ifs`])
//! applies thresholds, debouncing, timestamp checks and staleness monitoring before the readings
//! are published on the bus as [`SensorEvent`](comms_if::msg::SensorEvent)s. Consumers keep a
//! [`SensorState`] snapshot built from those events.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod ifs;
mod params;
mod registry;
mod state;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use ifs::*;
pub use params::*;
pub use registry::*;
pub use state::*;

use comms_if::msg::SensorId;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// A raw reading from an adapter, before thresholding and debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    /// The logical sensor the reading is for
    pub id: SensorId,

    /// Time of the reading, in the same time base as the `now_s` passed to the adapter's poll
    ///
    /// Units: seconds
    pub timestamp_s: f64,

    /// The raw value, see [`SensorEvent::value`](comms_if::msg::SensorEvent::value) for units
    pub value: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// The capabilities an adapter can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Infrared distance sensors, distances in cm
    Infrared,

    /// Contact bumpers, 1.0 when pressed
    Bumper,

    /// Inertial measurement unit, heading in radians
    Imu,

    /// Distance to the current target, in cm
    TargetRange,
}

/// Errors which can occur in the sensors module.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("Sensor {id:?} has not been updated for {age_s:.3} s")]
    Stale { id: SensorId, age_s: f64 },

    #[error("Sensor {id:?} reading at {new_s:.6} s is not after the previous one at {prev_s:.6} s")]
    NonMonotonic { id: SensorId, prev_s: f64, new_s: f64 },

    #[error("Sensor {id:?} produced an invalid value {value}")]
    InvalidValue { id: SensorId, value: f64 },

    #[error("Adapter \"{adapter}\" failed to read: {reason}")]
    ReadError { adapter: String, reason: String },

    #[error("Sensor {id:?} is provided by more than one adapter (second is \"{adapter}\")")]
    DuplicateSensor { id: SensorId, adapter: String },

    #[error("Adapter \"{adapter}\" was configured as {expected:?} but provides {found:?}")]
    KindMismatch {
        adapter: String,
        expected: Capability,
        found: Capability,
    },

    #[error("Adapter \"{adapter}\" with capability {capability:?} cannot provide sensor {id:?}")]
    CapabilityMismatch {
        adapter: String,
        capability: Capability,
        id: SensorId,
    },
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The boundary between a sensor driver and the stack.
///
/// Adapters must timestamp readings monotonically per sensor, in the time base of `now_s`.
pub trait SensorAdapter: Send {
    /// Name of the adapter instance, from the configuration
    fn name(&self) -> &str;

    /// The capability this adapter provides
    fn capability(&self) -> Capability;

    /// The logical sensors this adapter produces readings for
    fn sensor_ids(&self) -> Vec<SensorId>;

    /// Take the latest readings from the device.
    fn poll(&mut self, now_s: f64) -> Result<Vec<SensorReading>, SensorError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Capability {
    /// True if an adapter with this capability may produce readings for the given sensor.
    pub fn provides(&self, id: SensorId) -> bool {
        match self {
            Capability::Infrared => id.is_infrared(),
            Capability::Bumper => id.is_bumper(),
            Capability::Imu => id == SensorId::Heading,
            Capability::TargetRange => id == SensorId::TargetRange,
        }
    }
}
