//! # Robot library.
//!
//! This library allows other crates in the workspace (and the benchmarks) to access the modules
//! of the robot control stack.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Arbitrator - resolves competing motion requests into one command per cycle
pub mod arbitrator;

/// Behaviours - the policies which emit prioritised motion requests
pub mod behav;

/// Clock - periodic tick and tock generation
pub mod clock;

/// Loops - the concurrent periodic tasks which connect the modules to the bus
pub mod loops;

/// Motor control - per-wheel PID loops with slew limiting
pub mod motor_ctrl;

/// Odometry - displacement and pose from encoder steps
pub mod odometry;

/// The parameter snapshot shared by every module
pub mod params;

/// Safe mode tracking and fault escalation
pub mod safety;

/// Sensor adapters, registry and the integrated front sensor aggregator
pub mod sensors;

/// Simulated drive train and world, used when no hardware is present
pub mod sim;

/// Telemetry recording
pub mod tm;
