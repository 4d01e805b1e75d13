//! Parameters structure for the sensors

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::Capability;
use crate::params::{invalid, positive, ParamsError};
use comms_if::msg::SensorId;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for sensor polling and aggregation.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Rate at which the adapters are polled
    ///
    /// Units: Hz
    pub poll_freq_hz: f64,

    /// A sensor whose last reading is older than this is stale
    ///
    /// Units: seconds
    pub stale_timeout_s: f64,

    /// Number of polls a sensor may stay stale before a safety halt is requested
    pub max_stale_polls: u64,

    /// Integrated front sensor parameters
    pub ifs: IfsParams,

    /// The adapters to create at startup
    pub adapters: Vec<AdapterSpec>,
}

/// Parameters for the integrated front sensor (five infrared channels and three bumpers).
#[derive(Debug, Clone, Deserialize)]
pub struct IfsParams {
    /// Bus address of the IFS board, carried for the hardware adapter
    pub device_id: u16,

    /// Bus channel of the IFS board, carried for the hardware adapter
    pub channel: u8,

    /// Number of consecutive readings on the other side of a threshold before the triggered
    /// flag changes
    pub debounce_count: u32,

    /// Trigger distances for each infrared channel, port side to starboard side
    ///
    /// Units: cm
    pub port_side_trigger_cm: f64,
    pub port_trigger_cm: f64,
    pub centre_trigger_cm: f64,
    pub stbd_trigger_cm: f64,
    pub stbd_side_trigger_cm: f64,

    /// Maximum distance an infrared channel reports
    ///
    /// Units: cm
    pub max_range_cm: f64,
}

/// A single adapter to create at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterSpec {
    /// Name of this adapter, used in logs and faults
    pub name: String,

    /// The capability the adapter provides
    pub kind: Capability,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Params {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        positive("sensors", "poll_freq_hz", self.poll_freq_hz)?;
        positive("sensors", "stale_timeout_s", self.stale_timeout_s)?;
        self.ifs.are_valid()?;

        if self.adapters.is_empty() {
            return Err(invalid("sensors", "adapters", "at least one adapter is required"));
        }

        Ok(())
    }
}

impl IfsParams {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        if self.debounce_count == 0 {
            return Err(invalid("sensors.ifs", "debounce_count", "must be at least 1"));
        }

        positive("sensors.ifs", "port_side_trigger_cm", self.port_side_trigger_cm)?;
        positive("sensors.ifs", "port_trigger_cm", self.port_trigger_cm)?;
        positive("sensors.ifs", "centre_trigger_cm", self.centre_trigger_cm)?;
        positive("sensors.ifs", "stbd_trigger_cm", self.stbd_trigger_cm)?;
        positive("sensors.ifs", "stbd_side_trigger_cm", self.stbd_side_trigger_cm)?;
        positive("sensors.ifs", "max_range_cm", self.max_range_cm)?;

        Ok(())
    }

    /// The trigger distance for an infrared sensor, or `None` for any other sensor.
    pub fn trigger_cm(&self, id: SensorId) -> Option<f64> {
        match id {
            SensorId::InfraredPortSide => Some(self.port_side_trigger_cm),
            SensorId::InfraredPort => Some(self.port_trigger_cm),
            SensorId::InfraredCntr => Some(self.centre_trigger_cm),
            SensorId::InfraredStbd => Some(self.stbd_trigger_cm),
            SensorId::InfraredStbdSide => Some(self.stbd_side_trigger_cm),
            _ => None,
        }
    }
}
