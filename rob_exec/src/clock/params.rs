//! Parameters structure for the Clock

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::params::{invalid, positive, ParamsError};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for the Clock.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Tick frequency.
    ///
    /// Units: Hz
    pub loop_freq_hz: f64,

    /// A tock fires on every tick whose sequence number is a multiple of this value.
    pub tock_modulo: u64,

    /// If true ticks are published and dispatched on the bus before being passed to direct
    /// handlers. Bus handlers busy on another thread are skipped rather than waited for.
    pub bus_first: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Params {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        positive("clock", "loop_freq_hz", self.loop_freq_hz)?;

        if self.tock_modulo == 0 {
            return Err(invalid("clock", "tock_modulo", "must be at least 1"));
        }

        Ok(())
    }
}
