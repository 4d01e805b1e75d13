//! # Message Bus
//!
//! In-process publish/subscribe bus carrying [`Event`]s between the concurrent loops of the
//! control stack.
//!
//! Each subscriber owns a bounded queue. Publishing copies the event into the queue of every
//! subscriber interested in its kind and never blocks: if a queue is full the oldest event in it
//! is dropped and a warning is logged. Events reach each subscriber in publish order.
//!
//! Two styles of subscriber are supported:
//! - handler subscribers, registered with [`MessageBus::subscribe`], whose callbacks are invoked
//!   by [`MessageBus::dispatch`], usually from a dedicated pump loop,
//! - polled subscribers, registered with [`MessageBus::subscribe_queue`], which drain their own
//!   [`Subscription`] at their own cadence.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use log::{trace, warn};
use thiserror::Error;

// Internal
use crate::msg::{Event, EventKind};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Only every Nth drop on a queue is logged once the first has been reported.
const DROP_WARN_INTERVAL: u64 = 100;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Handle to the message bus. Cloning the handle shares the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Mutex<BusInner>>,
}

/// Identifier returned when subscribing, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A polled subscription to the bus.
///
/// Dropping the subscription does not unsubscribe it, call [`MessageBus::unsubscribe`] with
/// [`Subscription::id`] to stop receiving events.
pub struct Subscription {
    id: SubscriptionId,
    queue: Arc<Mutex<SubQueue>>,
}

/// Counters describing the bus since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Number of events published
    pub num_published: u64,

    /// Number of queued copies dropped because a subscriber queue was full
    pub num_dropped: u64,

    /// Number of handler invocations which panicked
    pub num_handler_panics: u64,

    /// Number of current subscribers
    pub num_subscribers: usize,
}

type Handler = Box<dyn FnMut(&Event) + Send>;

struct BusInner {
    depth: usize,
    next_id: u64,
    subs: Vec<SubEntry>,
    stats: BusStats,
}

struct SubEntry {
    id: SubscriptionId,
    name: String,
    kinds: Vec<EventKind>,
    queue: Arc<Mutex<SubQueue>>,
    handler: Option<Arc<Mutex<Handler>>>,
}

struct SubQueue {
    name: String,
    depth: usize,
    events: VecDeque<Event>,
    dropped: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("The bus queue depth must be at least 1")]
    ZeroDepth,

    #[error("No subscription with ID {0:?} exists")]
    UnknownSubscription(SubscriptionId),

    #[error("A subscriber must be interested in at least one kind of event")]
    NoEventKinds,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl MessageBus {
    /// Create a new bus where each subscriber queue holds at most `depth` events.
    pub fn new(depth: usize) -> Result<Self, BusError> {
        if depth == 0 {
            return Err(BusError::ZeroDepth);
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(BusInner {
                depth,
                next_id: 0,
                subs: Vec::new(),
                stats: BusStats::default(),
            })),
        })
    }

    /// Publish an event to every subscriber interested in its kind.
    ///
    /// Returns the number of subscribers the event was queued for. Never blocks waiting for a
    /// consumer.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let mut inner = lock(&self.inner);
        inner.stats.num_published += 1;

        let mut num_queued = 0;
        let mut num_dropped = 0;

        for sub in inner.subs.iter().filter(|s| s.kinds.contains(&kind)) {
            if lock(&sub.queue).push(event.clone()) {
                num_dropped += 1;
            }
            num_queued += 1;
        }

        inner.stats.num_dropped += num_dropped;

        trace!("Published {:?} to {} subscribers", kind, num_queued);

        num_queued
    }

    /// Register a handler which is called with every event of the given kinds.
    ///
    /// Handlers are invoked by [`MessageBus::dispatch`], never by `publish`. A handler must not
    /// call `dispatch` itself.
    pub fn subscribe<F>(
        &self,
        name: &str,
        kinds: &[EventKind],
        handler: F,
    ) -> Result<SubscriptionId, BusError>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let (id, _) = self.add_sub(name, kinds, Some(Box::new(handler)))?;
        Ok(id)
    }

    /// Register a polled subscription for events of the given kinds.
    pub fn subscribe_queue(
        &self,
        name: &str,
        kinds: &[EventKind],
    ) -> Result<Subscription, BusError> {
        let (id, queue) = self.add_sub(name, kinds, None)?;
        Ok(Subscription { id, queue })
    }

    /// Remove a subscription, discarding any events still queued for it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut inner = lock(&self.inner);

        match inner.subs.iter().position(|s| s.id == id) {
            Some(i) => {
                let sub = inner.subs.remove(i);
                inner.stats.num_subscribers = inner.subs.len();
                trace!("Unsubscribed \"{}\" from the bus", sub.name);
                Ok(())
            }
            None => Err(BusError::UnknownSubscription(id)),
        }
    }

    /// Deliver all queued events to handler subscribers.
    ///
    /// Handlers are called in subscription order, each receiving its events in publish order.
    /// A panicking handler is logged and skipped for that event, it does not stop delivery to
    /// the others. Returns the number of events delivered.
    pub fn dispatch(&self) -> usize {
        self.deliver(true)
    }

    /// Deliver queued events like [`MessageBus::dispatch`], but skip any subscriber whose handler
    /// is already running on another thread. Skipped events stay queued for the next dispatch.
    ///
    /// For time critical callers, such as the clock, which must not wait on a slow handler.
    pub fn try_dispatch(&self) -> usize {
        self.deliver(false)
    }

    fn deliver(&self, wait: bool) -> usize {
        // Take a snapshot of the handler subscribers so that handlers are free to publish
        let targets: Vec<(String, Arc<Mutex<SubQueue>>, Arc<Mutex<Handler>>)> = {
            let inner = lock(&self.inner);
            inner
                .subs
                .iter()
                .filter_map(|s| {
                    s.handler
                        .as_ref()
                        .map(|h| (s.name.clone(), s.queue.clone(), h.clone()))
                })
                .collect()
        };

        let mut num_delivered = 0;
        let mut num_panics = 0;

        for (name, queue, handler) in targets {
            // The handler lock is held for the whole drain so concurrent dispatches cannot
            // reorder one subscriber's events.
            let mut handler = if wait {
                lock(&handler)
            } else {
                match handler.try_lock() {
                    Ok(g) => g,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => {
                        trace!("Bus handler \"{}\" busy, left for the next dispatch", name);
                        continue;
                    }
                }
            };

            loop {
                let event = match lock(&queue).events.pop_front() {
                    Some(e) => e,
                    None => break,
                };

                let result = panic::catch_unwind(AssertUnwindSafe(|| (&mut **handler)(&event)));
                if result.is_err() {
                    warn!(
                        "Bus handler \"{}\" panicked while handling a {:?} event",
                        name,
                        event.kind()
                    );
                    num_panics += 1;
                }
                num_delivered += 1;
            }
        }

        if num_panics > 0 {
            lock(&self.inner).stats.num_handler_panics += num_panics;
        }

        num_delivered
    }

    /// Get the bus counters.
    pub fn stats(&self) -> BusStats {
        lock(&self.inner).stats
    }

    fn add_sub(
        &self,
        name: &str,
        kinds: &[EventKind],
        handler: Option<Handler>,
    ) -> Result<(SubscriptionId, Arc<Mutex<SubQueue>>), BusError> {
        if kinds.is_empty() {
            return Err(BusError::NoEventKinds);
        }

        let mut inner = lock(&self.inner);

        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;

        let queue = Arc::new(Mutex::new(SubQueue {
            name: name.to_string(),
            depth: inner.depth,
            events: VecDeque::with_capacity(inner.depth),
            dropped: 0,
        }));

        inner.subs.push(SubEntry {
            id,
            name: name.to_string(),
            kinds: kinds.to_vec(),
            queue: queue.clone(),
            handler: handler.map(|h| Arc::new(Mutex::new(h))),
        });
        inner.stats.num_subscribers = inner.subs.len();

        trace!("Subscribed \"{}\" to {:?}", name, kinds);

        Ok((id, queue))
    }
}

impl Subscription {
    /// The ID of this subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Take the oldest queued event, if any.
    pub fn try_recv(&self) -> Option<Event> {
        lock(&self.queue).events.pop_front()
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        lock(&self.queue).events.drain(..).collect()
    }

    /// Number of events waiting in the queue.
    pub fn len(&self) -> usize {
        lock(&self.queue).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events dropped from this subscription's queue because it was full.
    pub fn dropped(&self) -> u64 {
        lock(&self.queue).dropped
    }
}

impl SubQueue {
    /// Push an event, dropping the oldest if full. Returns true if an event was dropped.
    fn push(&mut self, event: Event) -> bool {
        let mut dropped = false;

        if self.events.len() >= self.depth {
            if let Some(old) = self.events.pop_front() {
                self.dropped += 1;
                dropped = true;

                if self.dropped == 1 || self.dropped % DROP_WARN_INTERVAL == 0 {
                    warn!(
                        "Subscriber \"{}\" queue full, dropped oldest {:?} event ({} dropped so far)",
                        self.name,
                        old.kind(),
                        self.dropped
                    );
                }
            }
        }

        self.events.push_back(event);
        dropped
    }
}

/// Lock a mutex, recovering the data if another thread panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::msg::{HaltCause, Tick};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn tick(seq: u64) -> Event {
        Event::Tick(Tick {
            seq,
            is_tock: false,
        })
    }

    #[test]
    fn test_zero_depth() {
        assert_eq!(MessageBus::new(0).err(), Some(BusError::ZeroDepth));
    }

    #[test]
    fn test_queue_order_and_filter() {
        let bus = MessageBus::new(8).unwrap();
        let sub = bus.subscribe_queue("test", &[EventKind::Tick]).unwrap();

        bus.publish(tick(0));
        bus.publish(Event::Halt(HaltCause::Operator));
        bus.publish(tick(1));

        let events = sub.drain();
        assert_eq!(events, vec![tick(0), tick(1)]);
        assert!(sub.is_empty());
    }

    #[test]
    fn test_drop_oldest() {
        let bus = MessageBus::new(3).unwrap();
        let sub = bus.subscribe_queue("slow", &[EventKind::Tick]).unwrap();

        for i in 0..5 {
            bus.publish(tick(i));
        }

        assert_eq!(sub.dropped(), 2);
        assert_eq!(bus.stats().num_dropped, 2);
        assert_eq!(sub.drain(), vec![tick(2), tick(3), tick(4)]);
    }

    #[test]
    fn test_handlers_and_panics() {
        let bus = MessageBus::new(16).unwrap();
        let count = Arc::new(AtomicU64::new(0));

        bus.subscribe("bad", &[EventKind::Tick], |_| panic!("bad handler"))
            .unwrap();

        let c = count.clone();
        let id = bus
            .subscribe("good", &[EventKind::Tick], move |e| {
                if let Event::Tick(t) = e {
                    c.fetch_add(t.seq + 1, Ordering::SeqCst);
                }
            })
            .unwrap();

        bus.publish(tick(0));
        bus.publish(tick(1));

        // 2 events for each of the two handlers
        assert_eq!(bus.dispatch(), 4);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(bus.stats().num_handler_panics, 2);

        bus.unsubscribe(id).unwrap();
        assert_eq!(
            bus.unsubscribe(id),
            Err(BusError::UnknownSubscription(id))
        );
        assert_eq!(bus.stats().num_subscribers, 1);
    }

    #[test]
    fn test_handler_can_publish() {
        let bus = MessageBus::new(16).unwrap();
        let sub = bus.subscribe_queue("halts", &[EventKind::Halt]).unwrap();

        let inner_bus = bus.clone();
        bus.subscribe("relay", &[EventKind::Tick], move |_| {
            inner_bus.publish(Event::Halt(HaltCause::Operator));
        })
        .unwrap();

        bus.publish(tick(0));
        bus.dispatch();

        assert_eq!(sub.len(), 1);
    }

    #[test]
    fn test_try_dispatch_skips_busy_handler() {
        let bus = MessageBus::new(16).unwrap();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        bus.subscribe("slow", &[EventKind::Tick], move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();

        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        bus.subscribe("fast", &[EventKind::Tick], move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        bus.publish(tick(0));
        let pump_bus = bus.clone();
        let pump = std::thread::spawn(move || pump_bus.dispatch());

        // The pump is now inside the slow handler
        started_rx.recv().unwrap();
        bus.publish(tick(1));

        // Returns without waiting, the slow handler's events stay queued
        let delivered = bus.try_dispatch();
        assert_eq!(delivered, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        let pumped = pump.join().unwrap();

        // Every event reaches every handler exactly once
        assert_eq!(delivered + pumped, 4);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
