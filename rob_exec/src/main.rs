//! Main robot executable entry point.
//!
//! # Architecture
//!
//! The stack is a set of independently timed loops connected by the message bus:
//!
//!     - Clock: publishes a tick every cycle and a tock every Nth tick
//!     - Sensors: polls the adapters and publishes normalised readings
//!     - Arbitrator: polls the behaviours, resolves their requests and publishes one command
//!       per normal cycle, plus any ballistic preemption in between
//!     - Motor control: tracks the latest command with per-wheel PID loops, publishing wheel
//!       states and the odometry pose
//!     - Telemetry: records what happens on the bus
//!
//! With no hardware attached the motors, encoders and sensors are simulated.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use structopt::StructOpt;

// Internal
use comms_if::{
    bus::MessageBus,
    msg::{Event, HaltCause},
};
use rob_lib::{
    arbitrator::Arbitrator,
    behav::Behaviour,
    clock::Clock,
    loops::{self, MotorLoop},
    motor_ctrl::MotorCtrl,
    odometry::Odometry,
    params::RobotParams,
    safety::Supervisor,
    sensors::SensorRegistry,
    sim::SimDrive,
    tm::TmRecorder,
};
use util::{
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time given to the loops to act on the shutdown halt before they are stopped.
const SHUTDOWN_GRACE_S: f64 = 0.2;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "rob_exec", about = "Subsumption robot control stack")]
struct Opts {
    /// Parameter file, relative paths are resolved in the software root's params directory
    #[structopt(short, long, default_value = "robot.toml")]
    params: PathBuf,

    /// Stop after this many seconds, run until killed if not given
    #[structopt(short, long)]
    duration_s: Option<f64>,

    /// Minimum log level, one of info, debug or trace
    #[structopt(short, long, default_value = "debug")]
    log_level: LevelFilter,

    /// Directory sessions are created in
    #[structopt(long, default_value = "sessions")]
    sessions_dir: PathBuf,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("rob_exec", &opts.sessions_dir)
        .wrap_err("Failed to create the session")?;

    logger_init(opts.log_level, LevelFilter::Info, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Subsumption Robot Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params = RobotParams::load(&opts.params).wrap_err("Could not load the parameters")?;

    // ---- INITIALISE BUS AND SAFETY ----

    let bus = MessageBus::new(params.bus.queue_depth).wrap_err("Could not create the bus")?;

    Supervisor::new(&params.safety, bus.clone())
        .install()
        .wrap_err("Could not install the safety supervisor")?;

    // ---- INITIALISE EQUIPMENT ----

    let drive = SimDrive::new(
        &params.sim,
        &params.geometry,
        1.0 / params.motors.control_freq_hz,
    );
    let world = drive.world();
    let registry = SensorRegistry::from_specs(&params.sensors.adapters, |s| world.adapter(s))
        .wrap_err("Could not create the sensor adapters")?;

    info!("Simulated equipment initialised");

    // ---- INITIALISE MODULES ----

    let mut arbitrator = Arbitrator::default();
    arbitrator
        .init(
            (
                params.arbitrator.clone(),
                Behaviour::from_params(&params.behaviours),
            ),
            Some(&session),
        )
        .wrap_err("Failed to initialise the arbitrator")?;

    let mut motor_ctrl = MotorCtrl::new(&params.motors, &params.geometry);
    motor_ctrl
        .init(Some("motor_ctrl"), Some(&session))
        .wrap_err("Failed to initialise motor control")?;

    let recorder = TmRecorder::new(&params.tm, &bus, Some(&session))
        .wrap_err("Failed to initialise telemetry")?;

    info!("Module initialisation complete\n");

    // ---- START LOOPS ----

    let mut clock = Clock::new(&params.clock, Some(bus.clone()));
    {
        let bus = bus.clone();
        clock.on_tock(move |t| {
            let s = bus.stats();
            info!(
                "Tock {}: {} events published, {} dropped, {} handler panics",
                t.seq, s.num_published, s.num_dropped, s.num_handler_panics
            );
        });
    }

    let handles = vec![
        loops::spawn_bus_pump(&bus, params.bus.pump_freq_hz)?,
        loops::spawn_sensors(&bus, registry, &params.sensors, &params.safety)?,
        loops::spawn_arbitrator(&bus, arbitrator, &params.arbitrator)?,
        loops::spawn_motor(
            &bus,
            MotorLoop {
                ctrl: motor_ctrl,
                driver: Box::new(drive.clone()),
                encoder: Box::new(drive.clone()),
                odometry: Odometry::new(params.geometry),
            },
            &params.motors,
            &params.safety,
        )?,
        loops::spawn_tm(recorder, &params.tm, Some(session.clone()))?,
    ];

    clock
        .start(params.clock.loop_freq_hz)
        .wrap_err("Could not start the clock")?;

    info!("Beginning main loop\n");

    // ---- MAIN LOOP ----

    let start = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(100));

        if let Some(d) = opts.duration_s {
            if start.elapsed().as_secs_f64() >= d {
                info!("Run duration of {} s reached", d);
                break;
            }
        }
    }

    // ---- SHUTDOWN ----

    bus.publish(Event::Halt(HaltCause::Shutdown));
    thread::sleep(Duration::from_secs_f64(SHUTDOWN_GRACE_S));

    clock.stop();
    for h in handles {
        info!("Stopping {} loop", h.name());
        h.join();
    }

    let truth = drive.truth();
    info!(
        "Final simulated position ({:.3}, {:.3}) m, heading {:.3} rad",
        truth.position_m[0], truth.position_m[1], truth.heading_rad
    );
    if truth.in_contact {
        warn!("Robot finished in contact with the wall");
    }

    session.exit();

    info!("End of execution");

    Ok(())
}
