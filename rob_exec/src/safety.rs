//! # Safety
//!
//! Safe mode bookkeeping and the fault supervisor.
//!
//! Every component which moves the robot keeps its own [`SafeMode`], driven by the `Halt` and
//! `Resume` events on the bus. A halt is only cleared by a resume carrying the same cause, so a
//! recovered sensor can't release a halt raised by the motors.
//!
//! The [`Supervisor`] watches the fault reports and turns escalated faults into halts.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{error, info, warn};
use serde::Deserialize;
use thiserror::Error;

// Internal
use comms_if::{
    bus::{BusError, MessageBus, SubscriptionId},
    msg::{Event, EventKind, FaultReport, HaltCause},
};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for the safety supervisor.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// If true escalated faults halt the robot, otherwise they are only logged
    pub escalate_faults: bool,

    /// If true components publish a resume when the condition behind their halt clears
    pub resume_on_recovery: bool,
}

/// Safe mode state of a component.
#[derive(Debug, Clone, Default)]
pub struct SafeMode {
    /// Causes currently holding the component in safe mode
    causes: Vec<HaltCause>,
}

/// Turns escalated faults into halts.
pub struct Supervisor {
    params: Params,
    bus: MessageBus,

    /// Causes a halt has been published for and not yet resumed
    halted: Vec<HaltCause>,

    num_faults: u64,
    num_escalations: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SafetyError {
    #[error("Cannot clear safe mode with cause {requested:?}, active causes are {active:?}")]
    CauseMismatch {
        requested: HaltCause,
        active: Vec<HaltCause>,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl SafeMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put the component into safe mode with the given cause.
    ///
    /// Returns true if the component was not already in safe mode.
    pub fn make_safe(&mut self, cause: HaltCause) -> bool {
        let was_safe = self.is_safe();

        if !self.causes.contains(&cause) {
            warn!("Make safe requested, cause: {:?}", cause);
            self.causes.push(cause);
        }

        !was_safe
    }

    /// Attempt to clear the given cause.
    ///
    /// Safe mode is left once every cause has been cleared. If the component was not in safe
    /// mode `Ok(())` is returned.
    pub fn make_unsafe(&mut self, cause: HaltCause) -> Result<(), SafetyError> {
        if !self.is_safe() {
            return Ok(());
        }

        match self.causes.iter().position(|c| *c == cause) {
            Some(i) => {
                self.causes.remove(i);
                if self.causes.is_empty() {
                    info!("Make unsafe requested, cause {:?} cleared, safe mode disabled", cause);
                } else {
                    info!(
                        "Cause {:?} cleared, still safe because of {:?}",
                        cause, self.causes
                    );
                }
                Ok(())
            }
            None => Err(SafetyError::CauseMismatch {
                requested: cause,
                active: self.causes.clone(),
            }),
        }
    }

    pub fn is_safe(&self) -> bool {
        !self.causes.is_empty()
    }

    pub fn causes(&self) -> &[HaltCause] {
        &self.causes
    }

    /// Update from a bus event. Returns true if the event was a halt or resume.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::Halt(cause) => {
                self.make_safe(*cause);
                true
            }
            Event::Resume(cause) => {
                if let Err(e) = self.make_unsafe(*cause) {
                    warn!("{}", e);
                }
                true
            }
            _ => false,
        }
    }
}

impl Supervisor {
    pub fn new(params: &Params, bus: MessageBus) -> Self {
        Self {
            params: params.clone(),
            bus,
            halted: Vec::new(),
            num_faults: 0,
            num_escalations: 0,
        }
    }

    /// Move the supervisor into a handler subscription on its bus.
    pub fn install(self) -> Result<SubscriptionId, BusError> {
        let bus = self.bus.clone();
        let mut sup = self;
        bus.subscribe(
            "supervisor",
            &[EventKind::Fault, EventKind::Resume],
            move |e| sup.on_event(e),
        )
    }

    /// Handle one bus event.
    pub fn on_event(&mut self, event: &Event) {
        match event {
            Event::Fault(f) => self.on_fault(f),
            Event::Resume(cause) => self.halted.retain(|c| c != cause),
            _ => (),
        }
    }

    pub fn num_faults(&self) -> u64 {
        self.num_faults
    }

    pub fn num_escalations(&self) -> u64 {
        self.num_escalations
    }

    fn on_fault(&mut self, fault: &FaultReport) {
        self.num_faults += 1;

        if !fault.escalated {
            warn!("Fault from {}: {:?}, {}", fault.source, fault.kind, fault.detail);
            return;
        }

        error!(
            "Escalated fault from {}: {:?}, {}",
            fault.source, fault.kind, fault.detail
        );
        self.num_escalations += 1;

        if !self.params.escalate_faults {
            return;
        }

        let cause = match HaltCause::from_fault(fault.kind) {
            Some(c) => c,
            None => {
                warn!("{:?} faults do not halt the robot", fault.kind);
                return;
            }
        };

        if !self.halted.contains(&cause) {
            error!("Halting, cause: {:?}", cause);
            self.halted.push(cause);
            self.bus.publish(Event::Halt(cause));
        }
    }
}
