//! Integrated front sensor aggregation
//!
//! Turns raw readings into debounced [`SensorEvent`]s and monitors every sensor for staleness.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::collections::BTreeMap;
use log::{error, info, warn};

// Internal
use super::{IfsParams, Params, SensorError, SensorReading};
use comms_if::msg::{FaultKind, FaultReport, SensorEvent, SensorId};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Bumper readings at or above this value are contacts.
const BUMPER_CONTACT_THRESHOLD: f64 = 0.5;

/// Source name used in fault reports.
const FAULT_SOURCE: &str = "sensors";

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// The aggregator.
pub struct Ifs {
    params: IfsParams,

    stale_timeout_s: f64,

    max_stale_polls: u64,

    channels: BTreeMap<SensorId, Channel>,

    /// True once a stale sensor has exceeded the poll limit and a halt has been requested
    escalated: bool,
}

/// Everything produced by one aggregation pass.
#[derive(Debug, Default)]
pub struct IfsReport {
    /// Accepted readings, to be published
    pub events: Vec<SensorEvent>,

    /// Readings which were rejected
    pub rejected: Vec<SensorError>,

    /// Faults raised during this pass
    pub faults: Vec<FaultReport>,

    /// True if every sensor is fresh again after an escalation
    pub recovered: bool,
}

#[derive(Debug, Clone)]
struct Channel {
    /// Timestamp of the last accepted reading, `None` before the first
    last_timestamp_s: Option<f64>,

    /// Time the channel was last refreshed, initially the time it was created
    last_update_s: f64,

    triggered: bool,

    /// Consecutive readings disagreeing with `triggered`
    counter: u32,

    /// Consecutive polls for which this channel has been stale
    stale_polls: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Ifs {
    /// Create a new aggregator monitoring the given sensors, starting at time `now_s`.
    pub fn new(params: &Params, ids: &[SensorId], now_s: f64) -> Self {
        let channels = ids
            .iter()
            .map(|id| {
                (
                    *id,
                    Channel {
                        last_timestamp_s: None,
                        last_update_s: now_s,
                        triggered: false,
                        counter: 0,
                        stale_polls: 0,
                    },
                )
            })
            .collect();

        Self {
            params: params.ifs.clone(),
            stale_timeout_s: params.stale_timeout_s,
            max_stale_polls: params.max_stale_polls,
            channels,
            escalated: false,
        }
    }

    /// Process one poll's worth of readings, then check every sensor for staleness.
    pub fn process(&mut self, readings: &[SensorReading], now_s: f64) -> IfsReport {
        let mut report = IfsReport::default();

        for r in readings {
            match self.ingest(r) {
                Ok(e) => report.events.push(e),
                Err(e) => {
                    warn!("Rejected sensor reading: {}", e);
                    report.rejected.push(e);
                }
            }
        }

        self.check_stale(now_s, &mut report);

        report
    }

    /// Threshold and debounce a single reading.
    pub fn ingest(&mut self, reading: &SensorReading) -> Result<SensorEvent, SensorError> {
        if !reading.value.is_finite() || !reading.timestamp_s.is_finite() {
            return Err(SensorError::InvalidValue {
                id: reading.id,
                value: reading.value,
            });
        }

        let raw_triggered = self.raw_triggered(reading.id, reading.value);
        let debounce_count = self.params.debounce_count.max(1);
        let max_range_cm = self.params.max_range_cm;

        let channel = self.channels.entry(reading.id).or_insert(Channel {
            last_timestamp_s: None,
            last_update_s: reading.timestamp_s,
            triggered: false,
            counter: 0,
            stale_polls: 0,
        });

        if let Some(prev_s) = channel.last_timestamp_s {
            if reading.timestamp_s <= prev_s {
                return Err(SensorError::NonMonotonic {
                    id: reading.id,
                    prev_s,
                    new_s: reading.timestamp_s,
                });
            }
        }

        channel.last_timestamp_s = Some(reading.timestamp_s);
        channel.last_update_s = reading.timestamp_s;

        // Debounce
        if raw_triggered != channel.triggered {
            channel.counter += 1;
            if channel.counter >= debounce_count {
                channel.triggered = raw_triggered;
                channel.counter = 0;
            }
        } else {
            channel.counter = 0;
        }

        let value = if reading.id.is_infrared() {
            reading.value.max(0.0).min(max_range_cm)
        } else {
            reading.value
        };

        Ok(SensorEvent {
            source: reading.id,
            timestamp_s: reading.timestamp_s,
            value,
            triggered: channel.triggered,
        })
    }

    /// True if a halt has been requested for a stale sensor and not yet recovered.
    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    /// Sensors currently considered stale.
    pub fn stale_sensors(&self) -> Vec<SensorId> {
        self.channels
            .iter()
            .filter(|(_, c)| c.stale_polls > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    fn raw_triggered(&self, id: SensorId, value: f64) -> bool {
        if id.is_bumper() {
            value >= BUMPER_CONTACT_THRESHOLD
        } else {
            match self.params.trigger_cm(id) {
                Some(trigger) => value < trigger,
                None => false,
            }
        }
    }

    fn check_stale(&mut self, now_s: f64, report: &mut IfsReport) {
        let mut escalate = None;

        for (id, channel) in self.channels.iter_mut() {
            let age_s = now_s - channel.last_update_s;

            if age_s > self.stale_timeout_s {
                if channel.stale_polls == 0 {
                    let e = SensorError::Stale { id: *id, age_s };
                    warn!("{}", e);
                    report.faults.push(fault(e.to_string(), false));
                }
                channel.stale_polls += 1;

                if channel.stale_polls > self.max_stale_polls && escalate.is_none() {
                    escalate = Some((*id, age_s));
                }
            } else if channel.stale_polls > 0 {
                info!("Sensor {:?} is fresh again", id);
                channel.stale_polls = 0;
            }
        }

        match escalate {
            Some((id, age_s)) if !self.escalated => {
                self.escalated = true;
                error!(
                    "Sensor {:?} stale for more than {} polls ({:.3} s), requesting halt",
                    id, self.max_stale_polls, age_s
                );
                report.faults.push(fault(
                    SensorError::Stale { id, age_s }.to_string(),
                    true,
                ));
            }
            _ => (),
        }

        if self.escalated && self.channels.values().all(|c| c.stale_polls == 0) {
            info!("All sensors fresh, stale sensor escalation cleared");
            self.escalated = false;
            report.recovered = true;
        }
    }
}

fn fault(detail: String, escalated: bool) -> FaultReport {
    FaultReport {
        kind: FaultKind::SensorStale,
        source: FAULT_SOURCE.to_string(),
        detail,
        escalated,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sensors::AdapterSpec;

    fn params(debounce_count: u32) -> Params {
        Params {
            poll_freq_hz: 10.0,
            stale_timeout_s: 0.5,
            max_stale_polls: 3,
            ifs: IfsParams {
                device_id: 0x18,
                channel: 1,
                debounce_count,
                port_side_trigger_cm: 20.0,
                port_trigger_cm: 30.0,
                centre_trigger_cm: 40.0,
                stbd_trigger_cm: 30.0,
                stbd_side_trigger_cm: 20.0,
                max_range_cm: 150.0,
            },
            adapters: vec![AdapterSpec {
                name: "ifs".into(),
                kind: crate::sensors::Capability::Infrared,
            }],
        }
    }

    fn reading(id: SensorId, t: f64, value: f64) -> SensorReading {
        SensorReading {
            id,
            timestamp_s: t,
            value,
        }
    }

    #[test]
    fn test_threshold_and_debounce() {
        let mut ifs = Ifs::new(&params(2), &[SensorId::InfraredCntr], 0.0);

        // Single close reading is not enough
        let e = ifs.ingest(&reading(SensorId::InfraredCntr, 0.1, 10.0)).unwrap();
        assert!(!e.triggered);

        // A far reading resets the count
        let e = ifs.ingest(&reading(SensorId::InfraredCntr, 0.2, 90.0)).unwrap();
        assert!(!e.triggered);
        let e = ifs.ingest(&reading(SensorId::InfraredCntr, 0.3, 10.0)).unwrap();
        assert!(!e.triggered);

        // Second consecutive close reading triggers
        let e = ifs.ingest(&reading(SensorId::InfraredCntr, 0.4, 10.0)).unwrap();
        assert!(e.triggered);
        assert_eq!(e.value, 10.0);

        // And it takes two far readings to clear
        let e = ifs.ingest(&reading(SensorId::InfraredCntr, 0.5, 90.0)).unwrap();
        assert!(e.triggered);
        let e = ifs.ingest(&reading(SensorId::InfraredCntr, 0.6, 90.0)).unwrap();
        assert!(!e.triggered);
    }

    #[test]
    fn test_bumper_and_range_clamp() {
        let mut ifs = Ifs::new(&params(1), &[], 0.0);

        let e = ifs.ingest(&reading(SensorId::BumperPort, 0.1, 1.0)).unwrap();
        assert!(e.triggered);

        let e = ifs.ingest(&reading(SensorId::InfraredPort, 0.1, 500.0)).unwrap();
        assert_eq!(e.value, 150.0);
        assert!(!e.triggered);

        // Heading is never triggered
        let e = ifs.ingest(&reading(SensorId::Heading, 0.1, 0.0)).unwrap();
        assert!(!e.triggered);
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let mut ifs = Ifs::new(&params(1), &[SensorId::InfraredCntr], 0.0);

        ifs.ingest(&reading(SensorId::InfraredCntr, 1.0, 50.0)).unwrap();
        assert!(matches!(
            ifs.ingest(&reading(SensorId::InfraredCntr, 1.0, 50.0)),
            Err(SensorError::NonMonotonic { .. })
        ));
        assert!(matches!(
            ifs.ingest(&reading(SensorId::InfraredCntr, 0.5, 50.0)),
            Err(SensorError::NonMonotonic { .. })
        ));
        assert!(matches!(
            ifs.ingest(&reading(SensorId::InfraredCntr, 2.0, std::f64::NAN)),
            Err(SensorError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_stale_escalation_and_recovery() {
        let mut ifs = Ifs::new(&params(1), &[SensorId::InfraredCntr], 0.0);

        // Fresh
        let r = ifs.process(&[reading(SensorId::InfraredCntr, 0.1, 50.0)], 0.1);
        assert!(r.faults.is_empty());

        // Stale from here, one non-escalated fault on the first stale poll
        let r = ifs.process(&[], 1.0);
        assert_eq!(r.faults.len(), 1);
        assert!(!r.faults[0].escalated);
        assert_eq!(ifs.stale_sensors(), vec![SensorId::InfraredCntr]);

        let r = ifs.process(&[], 1.1);
        assert!(r.faults.is_empty());
        let r = ifs.process(&[], 1.2);
        assert!(r.faults.is_empty());

        // Fourth stale poll exceeds the limit of 3
        let r = ifs.process(&[], 1.3);
        assert_eq!(r.faults.len(), 1);
        assert!(r.faults[0].escalated);
        assert_eq!(r.faults[0].kind, FaultKind::SensorStale);
        assert!(ifs.is_escalated());

        // Only escalated once
        let r = ifs.process(&[], 1.4);
        assert!(r.faults.is_empty());

        // Fresh reading clears it
        let r = ifs.process(&[reading(SensorId::InfraredCntr, 1.5, 50.0)], 1.5);
        assert!(r.recovered);
        assert!(!ifs.is_escalated());
        assert!(ifs.stale_sensors().is_empty());
    }

    #[test]
    fn test_never_seen_sensor_goes_stale() {
        let mut ifs = Ifs::new(&params(1), &[SensorId::BumperCntr], 0.0);

        assert!(ifs.process(&[], 0.4).faults.is_empty());
        assert_eq!(ifs.process(&[], 0.6).faults.len(), 1);
    }
}
