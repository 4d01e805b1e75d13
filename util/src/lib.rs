//! Utility library for the Subsumption Robot Software
//!
//! Provides the ambient services shared by every executable in the workspace: session
//! directories, logging, parameter loading, cycle timing, archiving and the cyclic module trait.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod archive;
pub mod logger;
pub mod maths;
pub mod module;
pub mod params;
pub mod session;
pub mod time;
