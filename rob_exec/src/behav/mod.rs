//! # Behaviours module
//!
//! Behaviours are independent policies which, given the current sensor state and clock tick,
//! may emit a prioritised [`MotionRequest`]. The set of behaviours is closed and each one is a
//! data and policy pair, dispatched through the [`Behaviour`] enum so that the priority order of
//! a deployment can be listed at startup.
//!
//! Behaviours never write shared state, they only emit requests.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod avoidance;
mod cruise;
mod params;
mod targeting;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use avoidance::Avoidance;
pub use cruise::Cruise;
pub use params::*;
pub use targeting::Targeting;

use log::info;
use serde::Serialize;

use crate::sensors::SensorState;
use comms_if::msg::{ArbitratedCommand, BehaviourId, Tick};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// A request for motion emitted by a behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionRequest {
    /// The requesting behaviour
    pub behaviour: BehaviourId,

    /// Higher priorities win arbitration
    pub priority: i32,

    /// Units: cm/s
    pub linear_cm_s: f64,

    /// Units: rad/s, positive to port
    pub steering_rad_s: f64,

    /// Ballistic requests pre-empt normal arbitration
    pub ballistic: bool,

    /// Number of arbitration cycles the request is valid for, including the one it is issued on
    pub validity_cycles: u64,

    /// The arbitration cycle the request was collected on, set by the arbitrator
    pub issued_cycle: u64,

    /// Monotonic collection stamp used to break priority ties, set by the arbitrator
    pub stamp: u64,
}

/// The Idle behaviour, a stop request at the lowest priority.
#[derive(Debug, Clone)]
pub struct Idle {
    params: IdleParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// The closed set of behaviours.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Cruise(Cruise),
    Avoidance(Avoidance),
    Targeting(Targeting),
    Idle(Idle),
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl MotionRequest {
    /// Create a new, normal, request. Collection fields are filled in by the arbitrator.
    pub fn new(
        behaviour: BehaviourId,
        priority: i32,
        linear_cm_s: f64,
        steering_rad_s: f64,
        validity_cycles: u64,
    ) -> Self {
        Self {
            behaviour,
            priority,
            linear_cm_s,
            steering_rad_s,
            ballistic: false,
            validity_cycles,
            issued_cycle: 0,
            stamp: 0,
        }
    }

    /// Mark the request as ballistic.
    pub fn into_ballistic(mut self) -> Self {
        self.ballistic = true;
        self
    }

    /// The first cycle on which this request is no longer valid.
    pub fn expires_at(&self) -> u64 {
        self.issued_cycle.saturating_add(self.validity_cycles)
    }

    /// True if the request may be selected on the given cycle.
    pub fn is_valid(&self, cycle: u64) -> bool {
        cycle >= self.issued_cycle && cycle < self.expires_at()
    }

    /// Convert the request into the command dispatched on the given cycle.
    pub fn to_command(&self, cycle: u64) -> ArbitratedCommand {
        ArbitratedCommand {
            linear_cm_s: self.linear_cm_s,
            steering_rad_s: self.steering_rad_s,
            source: self.behaviour,
            cycle,
            ballistic: self.ballistic,
            stop: false,
        }
    }
}

impl Behaviour {
    /// Build the enabled behaviours, highest priority first, and log their order.
    ///
    /// Idle is always included.
    pub fn from_params(params: &Params) -> Vec<Behaviour> {
        let mut list = Vec::new();

        if params.avoidance.enabled {
            list.push(Behaviour::Avoidance(Avoidance::new(&params.avoidance)));
        }
        if params.targeting.enabled {
            list.push(Behaviour::Targeting(Targeting::new(&params.targeting)));
        }
        if params.cruise.enabled {
            list.push(Behaviour::Cruise(Cruise::new(&params.cruise)));
        }
        list.push(Behaviour::Idle(Idle::new(&params.idle)));

        list.sort_by(|a, b| b.priority().cmp(&a.priority()));

        info!("Behaviours in priority order:");
        for b in list.iter() {
            match b.ballistic_priority() {
                Some(bp) => info!(
                    "    {:?}: priority {} (ballistic {})",
                    b.id(),
                    b.priority(),
                    bp
                ),
                None => info!("    {:?}: priority {}", b.id(), b.priority()),
            }
        }

        list
    }

    pub fn id(&self) -> BehaviourId {
        match self {
            Behaviour::Cruise(_) => BehaviourId::Cruise,
            Behaviour::Avoidance(_) => BehaviourId::Avoidance,
            Behaviour::Targeting(_) => BehaviourId::Targeting,
            Behaviour::Idle(_) => BehaviourId::Idle,
        }
    }

    /// Priority of this behaviour's normal requests.
    pub fn priority(&self) -> i32 {
        match self {
            Behaviour::Cruise(b) => b.params().priority,
            Behaviour::Avoidance(b) => b.params().priority,
            Behaviour::Targeting(b) => b.params().priority,
            Behaviour::Idle(b) => b.params.priority,
        }
    }

    /// Priority of this behaviour's ballistic requests, if it can issue any.
    pub fn ballistic_priority(&self) -> Option<i32> {
        match self {
            Behaviour::Avoidance(b) => Some(b.params().astern_priority),
            _ => None,
        }
    }

    /// True if this behaviour is polled on the ballistic cadence.
    pub fn can_be_ballistic(&self) -> bool {
        self.ballistic_priority().is_some()
    }

    /// Evaluate the behaviour's policy against the current state.
    pub fn evaluate(&mut self, state: &SensorState, tick: &Tick) -> Option<MotionRequest> {
        match self {
            Behaviour::Cruise(b) => b.evaluate(state, tick),
            Behaviour::Avoidance(b) => b.evaluate(state, tick),
            Behaviour::Targeting(b) => b.evaluate(state, tick),
            Behaviour::Idle(b) => b.evaluate(state, tick),
        }
    }
}

impl Idle {
    pub fn new(params: &IdleParams) -> Self {
        Self {
            params: params.clone(),
        }
    }

    pub fn evaluate(&mut self, _state: &SensorState, _tick: &Tick) -> Option<MotionRequest> {
        Some(MotionRequest::new(
            BehaviourId::Idle,
            self.params.priority,
            0.0,
            0.0,
            self.params.validity_cycles,
        ))
    }
}
