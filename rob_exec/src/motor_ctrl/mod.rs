//! # Motor control module
//!
//! Closed loop velocity control of the two drive wheels. Each step the arbitrated body demand is
//! split into wheel velocity targets, compared against the velocity measured from the encoders,
//! and driven through a PID controller and a slew limiter into a bounded wheel power.
//!
//! The hardware is reached through the [`MotorDriver`] and [`EncoderSource`] traits, so that the
//! same control code runs against real motors or the simulated drive.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod pid;
mod slew;
mod state;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use params::*;
pub use pid::PidController;
pub use slew::SlewLimiter;
pub use state::*;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which can apply power to the wheels.
pub trait MotorDriver: Send {
    /// Apply the given normalised powers, indexed by
    /// [`Wheel::index`](comms_if::msg::Wheel::index). The sign gives the direction.
    fn write_powers(&mut self, powers: &[f64; 2]) -> Result<(), MotorCtrlError>;
}

/// Something which can count wheel encoder steps.
pub trait EncoderSource: Send {
    /// Read the absolute step count of each wheel, indexed by
    /// [`Wheel::index`](comms_if::msg::Wheel::index).
    fn read_steps(&mut self) -> Result<[i64; 2], MotorCtrlError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in motor control.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MotorCtrlError {
    #[error("Could not read the wheel encoders: {0}")]
    Feedback(String),

    #[error("Could not write the wheel powers: {0}")]
    Driver(String),

    #[error("Control step requested with an invalid elapsed time ({0} s)")]
    InvalidStep(f64),
}
