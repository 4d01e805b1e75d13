//! # Periodic loops
//!
//! The control stack runs as a small fixed set of independently timed loops, each on its own
//! thread and each talking to the others only through the [`MessageBus`]:
//!
//! - the bus pump, delivering queued events to handler subscribers,
//! - sensor polling and aggregation,
//! - the arbitrator, ticking at the ballistic period and running a normal cycle every
//!   `loop_delay_s`,
//! - motor control, which only ever reads the latest published command,
//! - telemetry.
//!
//! No loop waits on another. The clock runs its own thread, see [`crate::clock`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use log::{debug, error, info, warn};
use thiserror::Error;

// Internal
use crate::{
    arbitrator::{self, Arbitrator, Cadence},
    motor_ctrl::{self, EncoderSource, MotorCtrl, MotorDriver},
    odometry::Odometry,
    safety::{self, SafeMode},
    sensors::{self, Ifs, SensorRegistry, SensorState},
    tm::{self, TmRecorder},
};
use comms_if::{
    bus::{BusError, MessageBus},
    msg::{Event, EventKind, HaltCause, Tick},
};
use util::{archive::Archived, module::State, session::Session, time::CycleTimer};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Handle to a running loop. Dropping the handle stops the loop and waits for it to exit.
pub struct LoopHandle {
    name: &'static str,
    run: Arc<AtomicBool>,
    jh: Option<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Could not spawn the {0} loop thread: {1}")]
    Spawn(&'static str, std::io::Error),

    #[error("Could not subscribe to the bus: {0}")]
    Bus(#[from] BusError),
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl LoopHandle {
    /// Run `body` every `period_s` seconds on a new thread. The body is passed the time since
    /// its previous call.
    pub fn spawn<F>(name: &'static str, period_s: f64, mut body: F) -> Result<Self, LoopError>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let run = Arc::new(AtomicBool::new(true));
        let flag = run.clone();

        let jh = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let mut timer = CycleTimer::new(name, period_s);

                while flag.load(Ordering::Relaxed) {
                    let dt = timer.start();
                    body(dt);
                    timer.wait();
                }

                debug!("{} loop exited", name);
            })
            .map_err(|e| LoopError::Spawn(name, e))?;

        info!("{} loop started, period {:.3} s", name, period_s);

        Ok(Self {
            name,
            run,
            jh: Some(jh),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the loop to stop after its current cycle.
    pub fn stop(&self) {
        self.run.store(false, Ordering::SeqCst);
    }

    /// Stop the loop and wait for it to exit.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop();
        if let Some(jh) = self.jh.take() {
            if jh.join().is_err() {
                warn!("{} loop panicked before exiting", self.name);
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Deliver queued events to handler subscribers at the given rate.
pub fn spawn_bus_pump(bus: &MessageBus, freq_hz: f64) -> Result<LoopHandle, LoopError> {
    let bus = bus.clone();
    LoopHandle::spawn("bus_pump", 1.0 / freq_hz, move |_| {
        bus.dispatch();
    })
}

/// Poll the sensor adapters and publish the aggregated readings and faults.
pub fn spawn_sensors(
    bus: &MessageBus,
    mut registry: SensorRegistry,
    params: &sensors::Params,
    safety: &safety::Params,
) -> Result<LoopHandle, LoopError> {
    let bus = bus.clone();
    let resume_on_recovery = safety.resume_on_recovery;
    let mut ifs = Ifs::new(params, &registry.sensor_ids(), 0.0);
    let start = Instant::now();

    LoopHandle::spawn("sensors", 1.0 / params.poll_freq_hz, move |_| {
        let now_s = start.elapsed().as_secs_f64();

        let poll = registry.poll_all(now_s);
        for e in poll.errors.iter() {
            warn!("Sensor read failed: {}", e);
        }

        let report = ifs.process(&poll.readings, now_s);
        for e in report.rejected.iter() {
            debug!("Reading rejected: {}", e);
        }

        for e in report.events {
            bus.publish(Event::Sensor(e));
        }
        for f in report.faults {
            bus.publish(Event::Fault(f));
        }
        if report.recovered && resume_on_recovery {
            bus.publish(Event::Resume(HaltCause::SensorStale));
        }
    })
}

/// Run the arbitrator on both of its cadences.
///
/// The loop ticks at the ballistic period and every `loop_delay_s` the tick is a normal cycle.
pub fn spawn_arbitrator(
    bus: &MessageBus,
    mut arbitrator: Arbitrator,
    params: &arbitrator::Params,
) -> Result<LoopHandle, LoopError> {
    let bus = bus.clone();
    let sub = bus.subscribe_queue(
        "arbitrator",
        &[
            EventKind::Tick,
            EventKind::Sensor,
            EventKind::Pose,
            EventKind::Halt,
            EventKind::Resume,
        ],
    )?;

    let normal_every = normal_cycle_ratio(params);
    let mut num_ticks: u64 = 0;

    let mut sensors = SensorState::new();
    let mut safe = SafeMode::new();
    let mut tick = Tick {
        seq: 0,
        is_tock: false,
    };

    LoopHandle::spawn("arbitrator", params.ballistic_loop_delay_s, move |_| {
        for e in sub.drain() {
            match e {
                Event::Tick(t) => tick = t,
                Event::Halt(_) | Event::Resume(_) => {
                    safe.apply(&e);
                }
                _ => {
                    sensors.apply(&e);
                }
            }
        }

        let cadence = if num_ticks % normal_every == 0 {
            Cadence::Normal
        } else {
            Cadence::Ballistic
        };
        num_ticks += 1;

        let input = arbitrator::InputData {
            cadence,
            tick,
            sensors: sensors.clone(),
            halted: safe.is_safe(),
        };

        match arbitrator.proc(&input) {
            Ok((output, report)) => {
                if let Some(cmd) = output {
                    bus.publish(Event::Command(cmd));
                }
                for f in report.faults {
                    bus.publish(Event::Fault(f));
                }
            }
            Err(e) => error!("Arbitration failed: {}", e),
        }

        if let Err(e) = arbitrator.write() {
            warn!("Could not archive the arbitrator report: {}", e);
        }
    })
}

/// Everything the motor control loop owns.
pub struct MotorLoop {
    pub ctrl: MotorCtrl,
    pub driver: Box<dyn MotorDriver>,
    pub encoder: Box<dyn EncoderSource>,
    pub odometry: Odometry,
}

/// Run motor control and odometry.
///
/// Only the latest command published since the previous step is used. Without a fresh command
/// motor control holds the last one until its timeout, then brakes.
pub fn spawn_motor(
    bus: &MessageBus,
    mut parts: MotorLoop,
    params: &motor_ctrl::Params,
    safety: &safety::Params,
) -> Result<LoopHandle, LoopError> {
    let bus = bus.clone();
    let sub = bus.subscribe_queue(
        "motor_ctrl",
        &[EventKind::Command, EventKind::Halt, EventKind::Resume],
    )?;
    let resume_on_recovery = safety.resume_on_recovery;
    let mut safe = SafeMode::new();

    LoopHandle::spawn("motor_ctrl", 1.0 / params.control_freq_hz, move |dt| {
        let mut cmd = None;
        for e in sub.drain() {
            match e {
                Event::Command(c) => cmd = Some(c),
                _ => {
                    safe.apply(&e);
                }
            }
        }

        let steps = match parts.encoder.read_steps() {
            Ok(s) => Some(s),
            Err(e) => {
                debug!("{}", e);
                None
            }
        };

        let input = motor_ctrl::InputData {
            cmd,
            steps,
            dt_s: dt,
            halted: safe.is_safe(),
        };

        let (powers, report) = match parts.ctrl.proc(&input) {
            Ok(o) => o,
            Err(e) => {
                error!("Motor control step failed: {}", e);
                ([0.0; 2], motor_ctrl::StatusReport::default())
            }
        };

        if let Err(e) = parts.driver.write_powers(&powers) {
            error!("{}", e);
        }

        if let Some(deltas) = report.deltas {
            parts.odometry.update(deltas, report.deltas_dt_s);
            bus.publish(Event::Pose(parts.odometry.pose()));
        }

        bus.publish(Event::Wheels(parts.ctrl.wheel_states()));
        for f in report.faults {
            bus.publish(Event::Fault(f));
        }
        if report.feedback_recovered && resume_on_recovery {
            bus.publish(Event::Resume(HaltCause::MotorFeedback));
        }

        if let Err(e) = parts.ctrl.write() {
            warn!("Could not archive the motor control step: {}", e);
        }
    })
}

/// Run the telemetry recorder, saving into the session if there is one.
pub fn spawn_tm(
    mut recorder: TmRecorder,
    params: &tm::Params,
    session: Option<Session>,
) -> Result<LoopHandle, LoopError> {
    let start = Instant::now();

    LoopHandle::spawn("tm", 1.0 / params.poll_freq_hz, move |_| {
        let now_s = start.elapsed().as_secs_f64();

        recorder.poll(now_s);

        if let Err(e) = recorder.write() {
            warn!("Could not archive telemetry: {}", e);
        }
        if let Some(ref s) = session {
            recorder.save_if_due(s, now_s);
        }
    })
}

/// Number of arbitrator ticks per normal cycle.
fn normal_cycle_ratio(params: &arbitrator::Params) -> u64 {
    let ratio = (params.loop_delay_s / params.ballistic_loop_delay_s).round();
    if ratio.is_finite() && ratio >= 1.0 {
        ratio as u64
    } else {
        1
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::behav::Behaviour;
    use crate::params::test::robot_params;
    use crate::sim::SimDrive;
    use std::time::Duration;

    #[test]
    fn test_normal_cycle_ratio() {
        let p = arbitrator::Params {
            loop_delay_s: 0.1,
            ballistic_loop_delay_s: 0.02,
            ..Default::default()
        };
        assert_eq!(normal_cycle_ratio(&p), 5);

        let p = arbitrator::Params {
            loop_delay_s: 0.02,
            ballistic_loop_delay_s: 0.02,
            ..Default::default()
        };
        assert_eq!(normal_cycle_ratio(&p), 1);
    }

    #[test]
    fn test_loop_stops() {
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let c = counter.clone();

        let h = LoopHandle::spawn("test", 0.001, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        h.join();

        let n = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert!(n > 0);
        assert_eq!(counter.load(Ordering::SeqCst), n);
    }

    #[test]
    fn test_stack_drives_and_halts() {
        let p = robot_params();
        let bus = MessageBus::new(p.bus.queue_depth).unwrap();
        let watch = bus
            .subscribe_queue("watch", &[EventKind::Command, EventKind::Wheels])
            .unwrap();

        let drive = SimDrive::new(&p.sim, &p.geometry, 1.0 / p.motors.control_freq_hz);
        let world = drive.world();
        let registry =
            SensorRegistry::from_specs(&p.sensors.adapters, |s| world.adapter(s)).unwrap();
        let arbitrator =
            Arbitrator::new(p.arbitrator.clone(), Behaviour::from_params(&p.behaviours)).unwrap();

        let loops = vec![
            spawn_sensors(&bus, registry, &p.sensors, &p.safety).unwrap(),
            spawn_arbitrator(&bus, arbitrator, &p.arbitrator).unwrap(),
            spawn_motor(
                &bus,
                MotorLoop {
                    ctrl: MotorCtrl::new(&p.motors, &p.geometry),
                    driver: Box::new(drive.clone()),
                    encoder: Box::new(drive.clone()),
                    odometry: Odometry::new(p.geometry),
                },
                &p.motors,
                &p.safety,
            )
            .unwrap(),
        ];

        thread::sleep(Duration::from_millis(500));
        let events = watch.drain();
        assert!(events.iter().any(|e| matches!(e, Event::Command(_))));
        assert!(events.iter().any(|e| matches!(e, Event::Wheels(_))));

        // A halt stops the wheels within a step or two of being seen
        bus.publish(Event::Halt(HaltCause::Operator));
        thread::sleep(Duration::from_millis(200));
        watch.drain();
        thread::sleep(Duration::from_millis(100));
        for e in watch.drain() {
            match e {
                Event::Command(c) => assert!(c.is_stop()),
                Event::Wheels(w) => {
                    assert_eq!(w.port.last_power, 0.0);
                    assert_eq!(w.stbd.last_power, 0.0);
                }
                _ => (),
            }
        }

        for l in loops {
            l.join();
        }
    }
}
