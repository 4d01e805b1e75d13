//! Implementations for the MotorCtrl state structure

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{error, info, trace, warn};
use serde::Serialize;

// Internal
use super::{MotorCtrlError, Params, PidController, SlewLimiter};
use crate::odometry::Geometry;
use comms_if::msg::{ArbitratedCommand, FaultKind, FaultReport, Wheel, WheelState, WheelStates};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    maths::clamp_abs,
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Motor control module state
pub struct MotorCtrl {
    params: Params,
    geometry: Geometry,

    pids: [PidController; 2],
    slews: [SlewLimiter; 2],
    wheels: [WheelState; 2],

    /// Step counts at the last good encoder read
    prev_steps: Option<[i64; 2]>,

    /// Time since the last good encoder read
    since_read_s: f64,

    num_steps: u64,

    num_stale_steps: u64,
    feedback_escalated: bool,

    /// The command being executed
    cmd: Option<ArbitratedCommand>,
    cmd_age_s: f64,
    cmd_stale: bool,

    report: StatusReport,
    arch_report: Archiver,
}

/// Input data to motor control.
#[derive(Debug, Clone, Default)]
pub struct InputData {
    /// A fresh command, or `None` if no new command arrived since the last step
    pub cmd: Option<ArbitratedCommand>,

    /// Absolute encoder step counts, or `None` if the encoders could not be read
    pub steps: Option<[i64; 2]>,

    /// Time since the previous step
    ///
    /// Units: seconds
    pub dt_s: f64,

    /// True while a global halt is in force
    pub halted: bool,
}

/// Status report for one control step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub step: u64,

    /// Encoder step deltas since the previous good read, `None` if the read failed
    pub deltas: Option<[i64; 2]>,

    /// Time the deltas were measured over
    ///
    /// Units: seconds
    pub deltas_dt_s: f64,

    /// True if the output was forced to zero and the controllers reset this step
    pub hard_stop: bool,

    /// True if the previous output is being held for lack of feedback
    pub holding: bool,

    /// True if the output is ramping down to zero because the command went stale
    pub braking: bool,

    pub feedback_stale: bool,
    pub feedback_escalated: bool,
    pub feedback_recovered: bool,

    pub cmd_stale: bool,

    /// Faults raised this step, to be published
    #[serde(skip)]
    pub faults: Vec<FaultReport>,
}

/// Flat archive row for one control step.
#[derive(Serialize)]
struct StepRecord {
    step: u64,
    port_target_cm_s: f64,
    port_measured_cm_s: f64,
    port_integral: f64,
    port_power: f64,
    stbd_target_cm_s: f64,
    stbd_measured_cm_s: f64,
    stbd_integral: f64,
    stbd_power: f64,
    hard_stop: bool,
    holding: bool,
    braking: bool,
    feedback_stale: bool,
    cmd_stale: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl State for MotorCtrl {
    type InitData = Option<&'static str>;
    type InitError = MotorCtrlError;

    type InputData = InputData;
    type OutputData = [f64; 2];
    type StatusReport = StatusReport;
    type ProcError = MotorCtrlError;

    /// Initialise motor control.
    ///
    /// Expected init data is an optional subdirectory of the session archive to write the step
    /// records into.
    fn init(
        &mut self,
        init_data: Self::InitData,
        session: Option<&Session>,
    ) -> Result<(), Self::InitError> {
        if let (Some(dir), Some(s)) = (init_data, session) {
            match Archiver::from_path(s, format!("{}/steps.csv", dir)) {
                Ok(a) => self.arch_report = a,
                Err(e) => warn!("Could not create the motor control archive: {}", e),
            }
        }

        self.reset_all();
        self.prev_steps = None;
        self.num_steps = 0;
        self.num_stale_steps = 0;
        self.feedback_escalated = false;
        self.cmd = None;
        self.cmd_age_s = 0.0;
        self.cmd_stale = false;

        Ok(())
    }

    /// Perform one control step.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let dt = input_data.dt_s;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(MotorCtrlError::InvalidStep(dt));
        }

        self.num_steps += 1;
        self.report = StatusReport {
            step: self.num_steps,
            ..Default::default()
        };

        self.update_cmd(input_data.cmd, dt);
        self.update_feedback(input_data.steps, dt);

        // Halts, explicit stops and lost feedback cut the output at once. A stale command only
        // ramps it down, since the arbitrator may simply be late.
        let cmd = self.cmd;
        let powers = match cmd {
            _ if input_data.halted || self.feedback_escalated => self.stop(),
            Some(c) if c.is_stop() => self.stop(),
            Some(_) if self.cmd_stale => self.brake(),
            Some(c) => {
                if self.report.feedback_stale {
                    // Hold the last output until feedback returns or the bound is reached
                    self.report.holding = true;
                    [self.wheels[0].last_power, self.wheels[1].last_power]
                } else {
                    self.control(&c, dt)
                }
            }
            None => self.stop(),
        };

        for w in Wheel::ALL.iter() {
            let i = w.index();
            self.wheels[i].last_power = powers[i];
            self.wheels[i].stale = self.report.feedback_stale;
        }

        self.report.feedback_escalated = self.feedback_escalated;
        self.report.cmd_stale = self.cmd_stale;

        trace!(
            "MotorCtrl step {}: power [{:.3}, {:.3}]",
            self.num_steps,
            powers[0],
            powers[1]
        );

        Ok((powers, self.report.clone()))
    }
}

impl Archived for MotorCtrl {
    fn write(&mut self) -> Result<(), ArchiveError> {
        if !self.arch_report.is_init() {
            return Ok(());
        }

        let p = &self.wheels[Wheel::Port.index()];
        let s = &self.wheels[Wheel::Stbd.index()];
        let record = StepRecord {
            step: self.num_steps,
            port_target_cm_s: p.target_cm_s,
            port_measured_cm_s: p.measured_cm_s,
            port_integral: p.integral,
            port_power: p.last_power,
            stbd_target_cm_s: s.target_cm_s,
            stbd_measured_cm_s: s.measured_cm_s,
            stbd_integral: s.integral,
            stbd_power: s.last_power,
            hard_stop: self.report.hard_stop,
            holding: self.report.holding,
            braking: self.report.braking,
            feedback_stale: self.report.feedback_stale,
            cmd_stale: self.report.cmd_stale,
        };

        self.arch_report.serialise(record)
    }
}

impl MotorCtrl {
    /// Create a new motor controller.
    pub fn new(params: &Params, geometry: &Geometry) -> Self {
        Self {
            params: params.clone(),
            geometry: *geometry,
            pids: [
                PidController::new(params.pid),
                PidController::new(params.pid),
            ],
            slews: [SlewLimiter::new(params.slew), SlewLimiter::new(params.slew)],
            wheels: [WheelState::new(Wheel::Port), WheelState::new(Wheel::Stbd)],
            prev_steps: None,
            since_read_s: 0.0,
            num_steps: 0,
            num_stale_steps: 0,
            feedback_escalated: false,
            cmd: None,
            cmd_age_s: 0.0,
            cmd_stale: false,
            report: StatusReport::default(),
            arch_report: Archiver::default(),
        }
    }

    /// Snapshot of both wheels after the last step.
    pub fn wheel_states(&self) -> WheelStates {
        WheelStates {
            step: self.num_steps,
            port: self.wheels[Wheel::Port.index()],
            stbd: self.wheels[Wheel::Stbd.index()],
        }
    }

    pub fn wheel(&self, wheel: Wheel) -> &WheelState {
        &self.wheels[wheel.index()]
    }

    /// The command currently being executed.
    pub fn current_cmd(&self) -> Option<&ArbitratedCommand> {
        self.cmd.as_ref()
    }

    fn update_cmd(&mut self, fresh: Option<ArbitratedCommand>, dt: f64) {
        match fresh {
            Some(c) => {
                if self.cmd_stale {
                    info!("Fresh command received, motor control resumed");
                    self.cmd_stale = false;
                }
                self.cmd = Some(c);
                self.cmd_age_s = 0.0;
            }
            None => {
                self.cmd_age_s += dt;

                if self.cmd.is_some()
                    && !self.cmd_stale
                    && self.cmd_age_s > self.params.cmd_timeout_s
                {
                    self.cmd_stale = true;
                    let detail = format!(
                        "No command for {:.3} s (timeout {:.3} s), braking",
                        self.cmd_age_s, self.params.cmd_timeout_s
                    );
                    warn!("{}", detail);
                    self.fault(FaultKind::CommandStale, detail, false);
                }
            }
        }
    }

    fn update_feedback(&mut self, steps: Option<[i64; 2]>, dt: f64) {
        self.since_read_s += dt;

        let steps = match steps {
            Some(s) => s,
            None => {
                self.num_stale_steps += 1;
                self.report.feedback_stale = true;

                if self.num_stale_steps == 1 {
                    let e = MotorCtrlError::Feedback("no encoder reading".into());
                    warn!("{}, holding output", e);
                    self.fault(FaultKind::MotorFeedback, e.to_string(), false);
                }

                if self.num_stale_steps > self.params.max_stale_steps && !self.feedback_escalated {
                    let detail = format!(
                        "No encoder reading for {} steps, stopping",
                        self.num_stale_steps
                    );
                    error!("{}", detail);
                    self.feedback_escalated = true;
                    self.fault(FaultKind::MotorFeedback, detail, true);
                }

                return;
            }
        };

        if self.num_stale_steps > 0 {
            info!(
                "Encoder feedback recovered after {} stale steps",
                self.num_stale_steps
            );
            self.num_stale_steps = 0;
            self.feedback_escalated = false;
            self.report.feedback_recovered = true;
        }

        let deltas = match self.prev_steps {
            Some(p) => [steps[0] - p[0], steps[1] - p[1]],
            None => [0, 0],
        };

        for w in Wheel::ALL.iter() {
            let i = w.index();
            self.wheels[i].steps = steps[i];
            self.wheels[i].measured_cm_s =
                self.geometry.steps_to_cm(deltas[i]) / self.since_read_s;
        }

        self.report.deltas = Some(deltas);
        self.report.deltas_dt_s = self.since_read_s;
        self.prev_steps = Some(steps);
        self.since_read_s = 0.0;
    }

    /// Run the controllers toward the command.
    fn control(&mut self, cmd: &ArbitratedCommand, dt: f64) -> [f64; 2] {
        let targets = self
            .geometry
            .wheel_velocities(cmd.linear_cm_s, cmd.steering_rad_s);

        let mut powers = [0f64; 2];

        for w in Wheel::ALL.iter() {
            let i = w.index();
            let state = &mut self.wheels[i];

            state.target_cm_s = targets[i];
            let error = state.target_cm_s - state.measured_cm_s;

            let raw = self.pids[i].get(error, dt);
            let slewed = self.slews[i].limit(raw);
            powers[i] = clamp_abs(&slewed, &self.params.max_power_limit);
            self.slews[i].set_prev(powers[i]);

            state.integral = self.pids[i].integral();
            state.derivative = self.pids[i].derivative();
        }

        powers
    }

    /// Zero the outputs and reset every controller.
    fn stop(&mut self) -> [f64; 2] {
        self.report.hard_stop = true;
        self.reset_all();
        [0.0; 2]
    }

    /// Ramp the outputs toward zero at the slew rate, with the controllers reset so that
    /// nothing is wound up when a fresh command arrives.
    fn brake(&mut self) -> [f64; 2] {
        self.report.braking = true;

        let mut powers = [0f64; 2];
        for i in 0..2 {
            self.pids[i].reset();
            powers[i] = clamp_abs(&self.slews[i].limit(0.0), &self.params.max_power_limit);
            self.slews[i].set_prev(powers[i]);

            self.wheels[i].target_cm_s = 0.0;
            self.wheels[i].integral = 0.0;
            self.wheels[i].derivative = 0.0;
        }

        powers
    }

    fn reset_all(&mut self) {
        for i in 0..2 {
            self.pids[i].reset();
            self.slews[i].reset();
            self.wheels[i].target_cm_s = 0.0;
            self.wheels[i].integral = 0.0;
            self.wheels[i].derivative = 0.0;
            self.wheels[i].last_power = 0.0;
        }
    }

    fn fault(&mut self, kind: FaultKind, detail: String, escalated: bool) {
        self.report.faults.push(FaultReport {
            kind,
            source: "motor_ctrl".into(),
            detail,
            escalated,
        });
    }
}
