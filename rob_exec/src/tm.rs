//! # Telemetry
//!
//! The telemetry recorder is a read-only consumer of the bus. It keeps a summary packet of the
//! latest command, wheel states, pose and faults, archives one CSV row per event, and saves the
//! packet into the session as JSON at a fixed period.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, warn};
use serde::{Deserialize, Serialize};

// Internal
use crate::params::{positive, ParamsError};
use crate::safety::SafeMode;
use comms_if::{
    bus::{BusError, MessageBus, Subscription},
    msg::{
        ArbitratedCommand, Event, EventKind, FaultReport, HaltCause, PoseEstimate, WheelStates,
    },
};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Events the recorder subscribes to.
const TM_EVENT_KINDS: [EventKind; 6] = [
    EventKind::Command,
    EventKind::Wheels,
    EventKind::Pose,
    EventKind::Fault,
    EventKind::Halt,
    EventKind::Resume,
];

/// Session relative path of the saved packet.
const PACKET_PATH: &str = "tm/packet.json";

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for telemetry.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Rate at which the recorder drains its queue
    ///
    /// Units: Hz
    pub poll_freq_hz: f64,

    /// Period between saves of the packet
    ///
    /// Units: seconds
    pub save_period_s: f64,

    /// If true every event is archived to CSV
    pub archive: bool,
}

/// Summary of the robot's state, as seen on the bus.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TmPacket {
    /// Time of the latest event
    ///
    /// Units: seconds
    pub time_s: f64,

    pub num_commands: u64,
    pub num_ballistic_commands: u64,
    pub last_command: Option<ArbitratedCommand>,

    pub wheels: Option<WheelStates>,

    pub pose: Option<PoseEstimate>,

    pub num_faults: u64,
    pub num_escalated_faults: u64,
    pub last_fault: Option<FaultReport>,

    pub num_halts: u64,
    pub halt_causes: Vec<HaltCause>,
}

/// One archived telemetry row. Fields which don't apply to the event are left at zero.
#[derive(Debug, Clone, Default, Serialize)]
struct TmRecord {
    time_s: f64,
    event: String,
    source: String,
    cycle: u64,
    linear_cm_s: f64,
    steering_rad_s: f64,
    ballistic: bool,
    port_power: f64,
    stbd_power: f64,
    x_m: f64,
    y_m: f64,
    heading_rad: f64,
    detail: String,
}

/// The telemetry recorder.
pub struct TmRecorder {
    params: Params,

    sub: Subscription,

    packet: TmPacket,

    safe: SafeMode,

    /// Rows not yet written to the archive
    pending: Vec<TmRecord>,
    arch: Archiver,

    last_save_s: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Params {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        positive("tm", "poll_freq_hz", self.poll_freq_hz)?;
        positive("tm", "save_period_s", self.save_period_s)
    }
}

impl TmRecorder {
    /// Subscribe a new recorder to the bus.
    ///
    /// If a session is given and archiving is enabled events are archived into the session.
    pub fn new(
        params: &Params,
        bus: &MessageBus,
        session: Option<&Session>,
    ) -> Result<Self, BusError> {
        let sub = bus.subscribe_queue("tm", &TM_EVENT_KINDS)?;

        let arch = match session {
            Some(s) if params.archive => match Archiver::from_path(s, "tm/events.csv") {
                Ok(a) => a,
                Err(e) => {
                    warn!("Could not create the telemetry archive: {}", e);
                    Archiver::default()
                }
            },
            _ => Archiver::default(),
        };

        Ok(Self {
            params: params.clone(),
            sub,
            packet: TmPacket::default(),
            safe: SafeMode::new(),
            pending: Vec::new(),
            arch,
            last_save_s: None,
        })
    }

    /// Drain the queue, updating the packet. Returns the number of events processed.
    pub fn poll(&mut self, now_s: f64) -> usize {
        let events = self.sub.drain();
        for e in events.iter() {
            self.apply(e, now_s);
        }

        if self.sub.dropped() > 0 && !events.is_empty() {
            debug!("Telemetry queue has dropped {} events", self.sub.dropped());
        }

        events.len()
    }

    /// Save the packet to the session if the save period has elapsed.
    ///
    /// Returns true if a save was requested.
    pub fn save_if_due(&mut self, session: &Session, now_s: f64) -> bool {
        let due = match self.last_save_s {
            Some(t) => now_s - t >= self.params.save_period_s,
            None => true,
        };

        if due {
            session.save(PACKET_PATH, self.packet.clone());
            self.last_save_s = Some(now_s);
        }

        due
    }

    pub fn packet(&self) -> &TmPacket {
        &self.packet
    }

    fn apply(&mut self, event: &Event, now_s: f64) {
        let p = &mut self.packet;
        p.time_s = now_s;

        let mut record = TmRecord {
            time_s: now_s,
            event: format!("{:?}", event.kind()),
            ..Default::default()
        };

        match event {
            Event::Command(c) => {
                p.num_commands += 1;
                if c.ballistic {
                    p.num_ballistic_commands += 1;
                }
                p.last_command = Some(*c);

                record.source = format!("{:?}", c.source);
                record.cycle = c.cycle;
                record.linear_cm_s = c.linear_cm_s;
                record.steering_rad_s = c.steering_rad_s;
                record.ballistic = c.ballistic;
            }
            Event::Wheels(w) => {
                p.wheels = Some(*w);

                record.cycle = w.step;
                record.port_power = w.port.last_power;
                record.stbd_power = w.stbd.last_power;
            }
            Event::Pose(pose) => {
                p.pose = Some(*pose);

                record.x_m = pose.x_m;
                record.y_m = pose.y_m;
                record.heading_rad = pose.heading_rad;
            }
            Event::Fault(f) => {
                p.num_faults += 1;
                if f.escalated {
                    p.num_escalated_faults += 1;
                }
                p.last_fault = Some(f.clone());

                record.source = f.source.clone();
                record.detail = format!("{:?}: {}", f.kind, f.detail);
            }
            Event::Halt(cause) | Event::Resume(cause) => {
                if let Event::Halt(_) = event {
                    p.num_halts += 1;
                }
                self.safe.apply(event);
                p.halt_causes = self.safe.causes().to_vec();

                record.detail = format!("{:?}", cause);
            }
            _ => return,
        }

        if self.arch.is_init() {
            self.pending.push(record);
        }
    }
}

impl Archived for TmRecorder {
    fn write(&mut self) -> Result<(), ArchiveError> {
        for r in self.pending.drain(..) {
            self.arch.serialise(r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::msg::{BehaviourId, FaultKind};

    fn params() -> Params {
        Params {
            poll_freq_hz: 10.0,
            save_period_s: 1.0,
            archive: true,
        }
    }

    #[test]
    fn test_packet_summary() {
        let bus = MessageBus::new(32).unwrap();
        let mut tm = TmRecorder::new(&params(), &bus, None).unwrap();

        let mut cmd = ArbitratedCommand::stop(3);
        bus.publish(Event::Command(cmd));
        cmd.ballistic = true;
        cmd.source = BehaviourId::Avoidance;
        bus.publish(Event::Command(cmd));
        bus.publish(Event::Pose(PoseEstimate {
            x_m: 1.5,
            ..Default::default()
        }));
        bus.publish(Event::Fault(FaultReport {
            kind: FaultKind::MotorFeedback,
            source: "motor_ctrl".into(),
            detail: String::new(),
            escalated: true,
        }));
        bus.publish(Event::Halt(HaltCause::MotorFeedback));

        // Not subscribed to ticks
        bus.publish(Event::Tick(comms_if::msg::Tick {
            seq: 0,
            is_tock: true,
        }));

        assert_eq!(tm.poll(2.0), 5);

        let p = tm.packet();
        assert_eq!(p.num_commands, 2);
        assert_eq!(p.num_ballistic_commands, 1);
        assert_eq!(p.last_command.map(|c| c.source), Some(BehaviourId::Avoidance));
        assert_eq!(p.pose.map(|p| p.x_m), Some(1.5));
        assert_eq!(p.num_escalated_faults, 1);
        assert_eq!(p.halt_causes, vec![HaltCause::MotorFeedback]);
        assert_eq!(p.time_s, 2.0);

        bus.publish(Event::Resume(HaltCause::MotorFeedback));
        tm.poll(2.5);
        assert!(tm.packet().halt_causes.is_empty());
        assert_eq!(tm.packet().num_halts, 1);
    }

    #[test]
    fn test_packet_serialises() {
        let bus = MessageBus::new(8).unwrap();
        let mut tm = TmRecorder::new(&params(), &bus, None).unwrap();

        bus.publish(Event::Halt(HaltCause::Operator));
        tm.poll(1.0);

        let v = serde_json::to_value(tm.packet()).unwrap();
        assert_eq!(v["num_halts"], 1);
        assert_eq!(v["halt_causes"][0], "Operator");
        assert!(v["last_command"].is_null());
    }

    #[test]
    fn test_nothing_pending_without_archive() {
        let bus = MessageBus::new(8).unwrap();
        let mut tm = TmRecorder::new(&params(), &bus, None).unwrap();

        bus.publish(Event::Command(ArbitratedCommand::stop(0)));
        tm.poll(0.0);

        assert!(tm.pending.is_empty());
        assert!(tm.write().is_ok());
    }
}
