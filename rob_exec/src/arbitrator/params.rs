//! Parameters structure for the Arbitrator

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::params::{invalid, positive, ParamsError};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for the Arbitrator.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Period of the normal arbitration cycle
    ///
    /// Units: seconds
    pub loop_delay_s: f64,

    /// Period of the ballistic check, shorter than the normal period
    ///
    /// Units: seconds
    pub ballistic_loop_delay_s: f64,

    /// Maximum time spent polling behaviours in one pass
    ///
    /// Units: seconds
    pub collection_timeout_s: f64,

    /// Number of consecutive idle cycles between idle log messages
    pub idle_log_interval: u64,

    /// If true the arbitrator starts suppressed and dispatches only stops
    pub start_suppressed: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            loop_delay_s: 0.1,
            ballistic_loop_delay_s: 0.02,
            collection_timeout_s: 0.01,
            idle_log_interval: 50,
            start_suppressed: false,
        }
    }
}

impl Params {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        positive("arbitrator", "loop_delay_s", self.loop_delay_s)?;
        positive("arbitrator", "ballistic_loop_delay_s", self.ballistic_loop_delay_s)?;
        positive("arbitrator", "collection_timeout_s", self.collection_timeout_s)?;

        if self.ballistic_loop_delay_s > self.loop_delay_s {
            return Err(invalid(
                "arbitrator",
                "ballistic_loop_delay_s",
                "must not be longer than loop_delay_s",
            ));
        }
        if self.collection_timeout_s >= self.ballistic_loop_delay_s {
            return Err(invalid(
                "arbitrator",
                "collection_timeout_s",
                "must be shorter than ballistic_loop_delay_s",
            ));
        }
        if self.idle_log_interval == 0 {
            return Err(invalid("arbitrator", "idle_log_interval", "must be at least 1"));
        }

        Ok(())
    }
}
