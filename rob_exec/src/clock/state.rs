//! Implementation of the Clock

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use log::{info, trace, warn};

// Internal
use super::{ClockError, Params};
use comms_if::{
    bus::MessageBus,
    msg::{Event, Tick},
};
use util::time::CycleTimer;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// A handler called directly by the clock on each tick or tock.
pub type TickHandler = Box<dyn FnMut(&Tick) + Send>;

/// The clock.
///
/// Handlers must not register further handlers from inside a handler call.
pub struct Clock {
    core: Arc<ClockCore>,

    run: Arc<AtomicBool>,

    jh: Option<JoinHandle<()>>,
}

/// State shared between the clock handle and its timer thread.
struct ClockCore {
    tock_modulo: u64,

    bus_first: bool,

    bus: Option<MessageBus>,

    next_seq: AtomicU64,

    tick_handlers: Mutex<Vec<TickHandler>>,

    tock_handlers: Mutex<Vec<TickHandler>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Clock {
    /// Create a new, stopped, clock.
    ///
    /// If `bus` is provided every tick is published on it.
    pub fn new(params: &Params, bus: Option<MessageBus>) -> Self {
        Self {
            core: Arc::new(ClockCore {
                tock_modulo: params.tock_modulo.max(1),
                bus_first: params.bus_first,
                bus,
                next_seq: AtomicU64::new(0),
                tick_handlers: Mutex::new(Vec::new()),
                tock_handlers: Mutex::new(Vec::new()),
            }),
            run: Arc::new(AtomicBool::new(false)),
            jh: None,
        }
    }

    /// Register a handler called on every tick.
    pub fn on_tick<F>(&self, handler: F)
    where
        F: FnMut(&Tick) + Send + 'static,
    {
        lock_handlers(&self.core.tick_handlers).push(Box::new(handler));
    }

    /// Register a handler called on every tock.
    pub fn on_tock<F>(&self, handler: F)
    where
        F: FnMut(&Tick) + Send + 'static,
    {
        lock_handlers(&self.core.tock_handlers).push(Box::new(handler));
    }

    /// Start firing ticks at the given frequency on a dedicated thread.
    pub fn start(&mut self, frequency_hz: f64) -> Result<(), ClockError> {
        if self.is_running() {
            return Err(ClockError::AlreadyRunning);
        }
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(ClockError::InvalidFrequency(frequency_hz));
        }

        self.run.store(true, Ordering::SeqCst);

        let core = self.core.clone();
        let run = self.run.clone();

        let jh = thread::Builder::new()
            .name("clock".into())
            .spawn(move || {
                let mut timer = CycleTimer::from_frequency("Clock", frequency_hz);

                while run.load(Ordering::Relaxed) {
                    timer.start();
                    core.fire();
                    timer.wait();
                }
            })
            .map_err(|e| {
                self.run.store(false, Ordering::SeqCst);
                ClockError::SpawnError(e)
            })?;

        self.jh = Some(jh);

        info!(
            "Clock started at {} Hz, tock every {} ticks",
            frequency_hz, self.core.tock_modulo
        );

        Ok(())
    }

    /// Stop the clock, waiting for the timer thread to exit.
    ///
    /// Does nothing if the clock is not running.
    pub fn stop(&mut self) {
        self.run.store(false, Ordering::SeqCst);

        if let Some(jh) = self.jh.take() {
            if jh.join().is_err() {
                warn!("Clock thread panicked before exiting");
            }
            info!(
                "Clock stopped after {} ticks",
                self.core.next_seq.load(Ordering::SeqCst)
            );
        }
    }

    /// True if the timer thread is running.
    pub fn is_running(&self) -> bool {
        self.jh.is_some()
    }

    /// Fire the next tick immediately on the calling thread.
    pub fn step(&self) -> Tick {
        self.core.fire()
    }

    /// Number of ticks fired so far.
    pub fn num_ticks(&self) -> u64 {
        self.core.next_seq.load(Ordering::SeqCst)
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ClockCore {
    fn fire(&self) -> Tick {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let tick = Tick {
            seq,
            is_tock: seq % self.tock_modulo == 0,
        };

        trace!("Tick {} (tock: {})", tick.seq, tick.is_tock);

        match (&self.bus, self.bus_first) {
            (Some(bus), true) => {
                bus.publish(Event::Tick(tick));
                bus.try_dispatch();
                self.call_handlers(&tick);
            }
            (Some(bus), false) => {
                self.call_handlers(&tick);
                bus.publish(Event::Tick(tick));
            }
            (None, _) => self.call_handlers(&tick),
        }

        tick
    }

    fn call_handlers(&self, tick: &Tick) {
        call_all(&self.tick_handlers, tick, "tick");

        if tick.is_tock {
            call_all(&self.tock_handlers, tick, "tock");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock_handlers(handlers: &Mutex<Vec<TickHandler>>) -> std::sync::MutexGuard<'_, Vec<TickHandler>> {
    match handlers.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Call every handler in the list, logging and skipping any which panic.
fn call_all(handlers: &Mutex<Vec<TickHandler>>, tick: &Tick, what: &str) {
    let mut handlers = lock_handlers(handlers);

    for (i, handler) in handlers.iter_mut().enumerate() {
        if panic::catch_unwind(AssertUnwindSafe(|| handler(tick))).is_err() {
            warn!("Clock {} handler {} panicked on tick {}", what, i, tick.seq);
        }
    }
}
