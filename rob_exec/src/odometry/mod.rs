//! # Odometry module
//!
//! Converts encoder step deltas into travelled distance and heading change, and integrates them
//! into a running [`PoseEstimate`](comms_if::msg::PoseEstimate). The pose is owned by
//! [`Odometry`] and only ever leaves it by copy.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub(crate) mod params;
mod state;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use params::*;
pub use state::*;
