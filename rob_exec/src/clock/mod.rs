//! # Clock module
//!
//! Generates the periodic tick that paces the stack. Every `tock_modulo`th tick is also a tock.
//! Ticks are published on the bus and delivered directly to registered handlers.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod state;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use params::*;
pub use state::*;

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur when starting or stopping the clock.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("The clock is already running")]
    AlreadyRunning,

    #[error("The clock frequency must be greater than zero, found {0} Hz")]
    InvalidFrequency(f64),

    #[error("Could not spawn the clock thread: {0}")]
    SpawnError(std::io::Error),
}
