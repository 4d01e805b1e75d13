//! Implementation of the Arbitrator state machine

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use log::{debug, info, trace, warn};
use serde::Serialize;

// Internal
use super::{resolve, ArbState, ArbitratorError, Cadence, Params};
use crate::behav::{Behaviour, MotionRequest};
use crate::sensors::SensorState;
use comms_if::msg::{ArbitratedCommand, BehaviourId, FaultKind, FaultReport, Tick};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// The arbitrator.
///
/// Owns the behaviours and the requests they have issued. Nothing else reads or writes the
/// request collection.
#[derive(Default)]
pub struct Arbitrator {
    params: Params,

    behaviours: Vec<Behaviour>,

    /// Latest normal request from each behaviour, kept until it expires or is replaced
    held: BTreeMap<BehaviourId, MotionRequest>,

    /// The latched ballistic request, if any
    latch: Option<MotionRequest>,

    /// Number of the next dispatch. Normal cycles and ballistic dispatches each take one.
    cycle: u64,

    next_stamp: u64,

    state: ArbState,

    suppressed: bool,

    num_idle_cycles: u64,

    report: StatusReport,
    arch_report: Archiver,
}

/// Input data to the Arbitrator.
#[derive(Debug, Clone)]
pub struct InputData {
    pub cadence: Cadence,

    /// The latest clock tick
    pub tick: Tick,

    /// The latest sensor snapshot
    pub sensors: SensorState,

    /// True while a global halt is in force
    pub halted: bool,
}

/// Status report for one arbitration pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub cycle: u64,

    pub num_collected: usize,

    pub num_expired: usize,

    pub timed_out: bool,

    /// Source of the dispatched command, if a command was dispatched
    pub winner: Option<BehaviourId>,

    /// True if the dispatched command is a latched ballistic command
    pub latched: bool,

    pub suppressed: bool,

    pub halted: bool,

    /// Faults raised during the pass, to be published
    #[serde(skip)]
    pub faults: Vec<FaultReport>,
}

/// Flat archive row for the status report.
#[derive(Serialize)]
struct ReportRecord {
    cycle: u64,
    num_collected: usize,
    num_expired: usize,
    timed_out: bool,
    winner: String,
    latched: bool,
    suppressed: bool,
    halted: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Default for ArbState {
    fn default() -> Self {
        ArbState::Idle
    }
}

impl State for Arbitrator {
    type InitData = (Params, Vec<Behaviour>);
    type InitError = ArbitratorError;

    type InputData = InputData;
    type OutputData = Option<ArbitratedCommand>;
    type StatusReport = StatusReport;
    type ProcError = ArbitratorError;

    /// Initialise the Arbitrator.
    ///
    /// Expected init data is the arbitrator's parameters and the behaviours in priority order.
    fn init(
        &mut self,
        init_data: Self::InitData,
        session: Option<&Session>,
    ) -> Result<(), Self::InitError> {
        let (params, behaviours) = init_data;

        if behaviours.is_empty() {
            return Err(ArbitratorError::NoBehaviours);
        }

        // The poll order is the priority order, so that a collection timeout only ever loses
        // the lowest priority behaviours.
        for pair in behaviours.windows(2) {
            if pair[0].priority() < pair[1].priority() {
                return Err(ArbitratorError::PriorityOrder(format!(
                    "{:?} ({}) is polled before {:?} ({})",
                    pair[0].id(),
                    pair[0].priority(),
                    pair[1].id(),
                    pair[1].priority()
                )));
            }
        }

        if let Some(s) = session {
            match Archiver::from_path(s, "arbitrator/status_report.csv") {
                Ok(a) => self.arch_report = a,
                Err(e) => warn!("Could not create the arbitrator archive: {}", e),
            }
        }

        self.suppressed = params.start_suppressed;
        self.params = params;
        self.behaviours = behaviours;
        self.held.clear();
        self.latch = None;
        self.cycle = 0;
        self.next_stamp = 0;
        self.state = ArbState::Idle;

        info!(
            "Arbitrator initialised with {} behaviours{}",
            self.behaviours.len(),
            if self.suppressed { " (suppressed)" } else { "" }
        );

        Ok(())
    }

    /// Perform one arbitration pass.
    ///
    /// A normal pass always outputs exactly one command. A ballistic pass outputs a command only
    /// if a ballistic request was accepted.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        if self.behaviours.is_empty() {
            return Err(ArbitratorError::NoBehaviours);
        }

        self.report = StatusReport {
            cycle: self.cycle,
            suppressed: self.suppressed,
            halted: input_data.halted,
            ..Default::default()
        };

        if input_data.halted || self.suppressed {
            self.discard();
        }

        let output = match input_data.cadence {
            Cadence::Normal => Some(self.normal_pass(input_data)),
            Cadence::Ballistic => self.ballistic_pass(input_data),
        };

        self.report.winner = output.map(|c| c.source);

        Ok((output, self.report.clone()))
    }
}

impl Archived for Arbitrator {
    fn write(&mut self) -> Result<(), ArchiveError> {
        if !self.arch_report.is_init() {
            return Ok(());
        }

        let r = &self.report;
        let record = ReportRecord {
            cycle: r.cycle,
            num_collected: r.num_collected,
            num_expired: r.num_expired,
            timed_out: r.timed_out,
            winner: r.winner.map(|w| format!("{:?}", w)).unwrap_or_default(),
            latched: r.latched,
            suppressed: r.suppressed,
            halted: r.halted,
        };

        self.arch_report.serialise(record)
    }
}

impl Arbitrator {
    /// Create and initialise an arbitrator without a session.
    pub fn new(params: Params, behaviours: Vec<Behaviour>) -> Result<Self, ArbitratorError> {
        let mut a = Self::default();
        a.init((params, behaviours), None)?;
        Ok(a)
    }

    /// Suppress or release the arbitrator. While suppressed every request is discarded and
    /// normal cycles dispatch stops.
    pub fn suppress(&mut self, suppressed: bool) {
        if suppressed != self.suppressed {
            info!(
                "Arbitrator {}",
                if suppressed { "suppressed" } else { "released" }
            );
        }
        self.suppressed = suppressed;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn state(&self) -> ArbState {
        self.state
    }

    /// Number the next dispatched command will carry.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// The currently latched ballistic request.
    pub fn latched(&self) -> Option<&MotionRequest> {
        self.latch.as_ref()
    }

    /// Number of held (not yet expired) normal requests.
    pub fn num_held(&self) -> usize {
        self.held.len()
    }

    /// Discard every held and latched request.
    pub fn discard(&mut self) {
        if !self.held.is_empty() || self.latch.is_some() {
            debug!("Discarding all motion requests");
        }
        self.held.clear();
        self.latch = None;
    }

    fn normal_pass(&mut self, input: &InputData) -> ArbitratedCommand {
        let cycle = self.cycle;

        // ---- COLLECTING ----
        self.set_state(ArbState::Collecting);

        let mut preempted = None;
        if !(input.halted || self.suppressed) {
            let requests = self.collect(input, false);
            self.report.num_collected = requests.len();

            for r in requests {
                if r.ballistic {
                    if self.offer_ballistic(r) {
                        preempted = Some(r);
                    }
                } else {
                    self.held.insert(r.behaviour, r);
                }
            }
        }

        // ---- RESOLVING ----
        self.set_state(ArbState::Resolving);

        let before = self.held.len();
        self.held.retain(|_, r| r.is_valid(cycle));
        self.report.num_expired = before - self.held.len();

        if let Some(l) = self.latch {
            if !l.is_valid(cycle) {
                debug!("Ballistic {:?} request expired", l.behaviour);
                self.latch = None;
            }
        }

        let command = if input.halted || self.suppressed {
            ArbitratedCommand::stop(cycle)
        } else if let Some(r) = preempted {
            // A ballistic request collected on this cycle replaces its normal dispatch
            self.report.latched = true;
            r.to_command(cycle)
        } else if let Some(l) = self.latch {
            self.report.latched = true;
            l.to_command(cycle)
        } else {
            match resolve(self.held.values(), cycle) {
                Some(r) => r.to_command(cycle),
                None => ArbitratedCommand::stop(cycle),
            }
        };

        // ---- DISPATCHING ----
        self.set_state(ArbState::Dispatching);

        trace!(
            "Cycle {}: {:?} {:.1} cm/s {:.3} rad/s",
            cycle,
            command.source,
            command.linear_cm_s,
            command.steering_rad_s
        );

        if command.source == BehaviourId::Idle {
            self.num_idle_cycles += 1;
            if self.num_idle_cycles % self.params.idle_log_interval.max(1) == 0 {
                info!("Arbitrator idle for {} cycles", self.num_idle_cycles);
            }
        } else {
            self.num_idle_cycles = 0;
        }

        self.set_state(ArbState::Idle);
        self.cycle += 1;

        command
    }

    fn ballistic_pass(&mut self, input: &InputData) -> Option<ArbitratedCommand> {
        if input.halted || self.suppressed {
            return None;
        }

        self.set_state(ArbState::Collecting);
        let requests = self.collect(input, true);
        self.report.num_collected = requests.len();

        self.set_state(ArbState::Resolving);
        let mut accepted = None;
        for r in requests {
            if r.ballistic {
                if self.offer_ballistic(r) {
                    accepted = Some(r);
                }
            } else {
                self.held.insert(r.behaviour, r);
            }
        }

        let output = accepted.map(|r| {
            self.set_state(ArbState::Dispatching);
            self.report.latched = true;

            let command = r.to_command(self.cycle);
            self.cycle += 1;
            command
        });

        self.set_state(ArbState::Idle);

        output
    }

    /// Poll the behaviours, stamping each request. Stops early if the collection timeout
    /// elapses, reporting a fault.
    fn collect(&mut self, input: &InputData, ballistic_only: bool) -> Vec<MotionRequest> {
        let start = Instant::now();
        let timeout = Duration::from_secs_f64(self.params.collection_timeout_s.max(0.0));

        let total = self
            .behaviours
            .iter()
            .filter(|b| !ballistic_only || b.can_be_ballistic())
            .count();

        let mut requests = Vec::with_capacity(total);
        let mut polled = 0;

        for b in self
            .behaviours
            .iter_mut()
            .filter(|b| !ballistic_only || b.can_be_ballistic())
        {
            if let Some(mut r) = b.evaluate(&input.sensors, &input.tick) {
                r.issued_cycle = self.cycle;
                r.stamp = self.next_stamp;
                self.next_stamp += 1;
                requests.push(r);
            }
            polled += 1;

            if polled < total && start.elapsed() >= timeout {
                let e = ArbitratorError::CollectionTimeout { polled, total };
                warn!("{}", e);
                self.report.timed_out = true;
                self.report.faults.push(FaultReport {
                    kind: FaultKind::ArbitrationTimeout,
                    source: "arbitrator".into(),
                    detail: e.to_string(),
                    escalated: false,
                });
                break;
            }
        }

        requests
    }

    /// Offer a ballistic request to the latch. Returns true if it was accepted.
    fn offer_ballistic(&mut self, r: MotionRequest) -> bool {
        let accept = match self.latch {
            Some(l) if l.is_valid(r.issued_cycle) => r.priority > l.priority,
            _ => true,
        };

        if accept {
            info!(
                "Ballistic {:?} request accepted for {} cycles ({:.1} cm/s, {:.3} rad/s)",
                r.behaviour, r.validity_cycles, r.linear_cm_s, r.steering_rad_s
            );
            self.latch = Some(r);
        } else {
            trace!("Ballistic {:?} request ignored, latch held", r.behaviour);
        }

        accept
    }

    fn set_state(&mut self, state: ArbState) {
        trace!("Arbitrator {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::behav::{
        Avoidance, AvoidanceParams, Cruise, CruiseParams, Idle, IdleParams,
    };
    use comms_if::msg::{SensorEvent, SensorId};

    fn cruise() -> Behaviour {
        Behaviour::Cruise(Cruise::new(&CruiseParams {
            enabled: true,
            priority: 1,
            validity_cycles: 2,
            velocity_cm_s: 50.0,
            slow_range_cm: 20.0,
            clear_range_cm: 100.0,
            target_range_threshold_m: 0.5,
        }))
    }

    fn avoidance() -> Behaviour {
        Behaviour::Avoidance(Avoidance::new(&AvoidanceParams {
            enabled: true,
            priority: 5,
            validity_cycles: 1,
            velocity_cm_s: 0.0,
            steering_rad_s: 0.8,
            astern_priority: 10,
            astern_velocity_cm_s: -20.0,
            astern_steering_rad_s: 0.5,
            astern_cycles: 3,
        }))
    }

    fn idle() -> Behaviour {
        Behaviour::Idle(Idle::new(&IdleParams {
            priority: 0,
            validity_cycles: 1,
        }))
    }

    fn arbitrator() -> Arbitrator {
        Arbitrator::new(Params::default(), vec![avoidance(), cruise(), idle()]).unwrap()
    }

    fn input(cadence: Cadence, readings: &[(SensorId, f64, bool)]) -> InputData {
        let mut sensors = SensorState::new();
        for (id, value, triggered) in readings {
            sensors.update(SensorEvent {
                source: *id,
                timestamp_s: 0.0,
                value: *value,
                triggered: *triggered,
            });
        }
        InputData {
            cadence,
            tick: Tick {
                seq: 0,
                is_tock: true,
            },
            sensors,
            halted: false,
        }
    }

    const CLEAR: [(SensorId, f64, bool); 1] = [(SensorId::InfraredCntr, 150.0, false)];
    const BLOCKED: [(SensorId, f64, bool); 1] = [(SensorId::InfraredCntr, 15.0, true)];
    const BUMPED: [(SensorId, f64, bool); 1] = [(SensorId::BumperCntr, 1.0, true)];

    fn normal(a: &mut Arbitrator, readings: &[(SensorId, f64, bool)]) -> ArbitratedCommand {
        a.proc(&input(Cadence::Normal, readings)).unwrap().0.unwrap()
    }

    #[test]
    fn test_init_checks() {
        assert!(matches!(
            Arbitrator::new(Params::default(), vec![]),
            Err(ArbitratorError::NoBehaviours)
        ));
        assert!(matches!(
            Arbitrator::new(Params::default(), vec![idle(), cruise()]),
            Err(ArbitratorError::PriorityOrder(_))
        ));
        assert!(matches!(
            Arbitrator::default().proc(&input(Cadence::Normal, &CLEAR)),
            Err(ArbitratorError::NoBehaviours)
        ));
    }

    #[test]
    fn test_cruise_only() {
        let mut a = arbitrator();
        let c = normal(&mut a, &CLEAR);

        assert_eq!(c.source, BehaviourId::Cruise);
        assert_eq!(c.linear_cm_s, 50.0);
        assert_eq!(c.cycle, 0);
        assert_eq!(a.cycle(), 1);
        assert_eq!(a.state(), ArbState::Idle);
    }

    #[test]
    fn test_avoidance_beats_cruise() {
        // Two behaviours both requesting, cruise at 50 and avoidance at 0
        let mut a = arbitrator();
        normal(&mut a, &CLEAR);

        // Cruise's request from the last cycle is still valid, avoidance's is new
        let c = normal(&mut a, &BLOCKED);
        assert_eq!(c.source, BehaviourId::Avoidance);
        assert_eq!(c.linear_cm_s, 0.0);
        assert_eq!(a.num_held(), 3);
    }

    #[test]
    fn test_expired_requests_dropped() {
        let mut a = arbitrator();
        normal(&mut a, &BLOCKED);

        // Avoidance's request has a one cycle window, so with no new request it must not win
        // even though it has the highest priority
        let c = normal(&mut a, &[]);
        assert_eq!(c.source, BehaviourId::Idle);
        assert!(c.is_still());

        // A zero demand from idle, not an immediate stop
        assert!(!c.is_stop());
    }

    #[test]
    fn test_ballistic_preempts_and_latches() {
        let mut a = arbitrator();
        normal(&mut a, &CLEAR);

        // Bumper seen on the ballistic cadence, dispatched immediately on its own cycle
        let (out, report) = a.proc(&input(Cadence::Ballistic, &BUMPED)).unwrap();
        let c = out.unwrap();
        assert!(c.ballistic);
        assert_eq!(c.linear_cm_s, -20.0);
        assert_eq!(c.cycle, 1);
        assert_eq!(a.cycle(), 2);
        assert!(report.latched);

        // Latched for the rest of its 3 cycle window, even once the bumper is released
        for _ in 0..2 {
            let c = normal(&mut a, &CLEAR);
            assert!(c.ballistic);
            assert_eq!(c.source, BehaviourId::Avoidance);
        }

        // Normal arbitration resumes
        let c = normal(&mut a, &CLEAR);
        assert!(!c.ballistic);
        assert_eq!(c.source, BehaviourId::Cruise);
    }

    #[test]
    fn test_command_cycles_unique() {
        let mut a = arbitrator();
        let mut cycles = vec![normal(&mut a, &CLEAR).cycle];

        let (out, _) = a.proc(&input(Cadence::Ballistic, &BUMPED)).unwrap();
        cycles.push(out.unwrap().cycle);

        cycles.push(normal(&mut a, &CLEAR).cycle);
        cycles.push(normal(&mut a, &CLEAR).cycle);

        assert_eq!(cycles, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_ballistic_pass_without_request() {
        let mut a = arbitrator();
        let (out, _) = a.proc(&input(Cadence::Ballistic, &CLEAR)).unwrap();
        assert!(out.is_none());
        assert_eq!(a.cycle(), 0);
    }

    #[test]
    fn test_ballistic_in_normal_cycle_replaces_dispatch() {
        let mut a = arbitrator();
        let c = normal(&mut a, &BUMPED);

        assert!(c.ballistic);
        assert_eq!(c.cycle, 0);
        assert!(a.latched().is_some());
    }

    #[test]
    fn test_halt_and_suppression() {
        let mut a = arbitrator();
        normal(&mut a, &CLEAR);
        a.proc(&input(Cadence::Ballistic, &BUMPED)).unwrap();

        let mut i = input(Cadence::Normal, &CLEAR);
        i.halted = true;
        let (out, report) = a.proc(&i).unwrap();
        assert!(out.unwrap().is_stop());
        assert!(report.halted);
        assert!(a.latched().is_none());
        assert_eq!(a.num_held(), 0);

        i.cadence = Cadence::Ballistic;
        assert!(a.proc(&i).unwrap().0.is_none());

        a.suppress(true);
        assert!(normal(&mut a, &CLEAR).is_stop());
        a.suppress(false);
        assert_eq!(normal(&mut a, &CLEAR).source, BehaviourId::Cruise);
    }

    #[test]
    fn test_collection_timeout() {
        let params = Params {
            collection_timeout_s: 0.0,
            ..Default::default()
        };
        let mut a = Arbitrator::new(params, vec![avoidance(), cruise(), idle()]).unwrap();

        // Only the first (highest priority) behaviour is polled, and one command still results
        let (out, report) = a.proc(&input(Cadence::Normal, &CLEAR)).unwrap();
        assert!(report.timed_out);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].kind, FaultKind::ArbitrationTimeout);
        assert!(out.unwrap().is_stop());
    }
}
