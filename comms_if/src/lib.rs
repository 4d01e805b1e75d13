//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software: the typed events which cross
//! between the concurrent loops of the control stack, and the in-process message bus which
//! carries them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Event definitions for everything published on the bus
pub mod msg;

/// In-process, bounded publish/subscribe message bus
pub mod bus;
