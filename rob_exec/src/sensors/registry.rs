//! Registry of capability-tagged sensor adapters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::collections::BTreeMap;
use log::{info, warn};

// Internal
use super::{AdapterSpec, Capability, SensorAdapter, SensorError, SensorReading};
use comms_if::msg::SensorId;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// The set of adapters resolved at startup.
///
/// Each logical sensor is provided by exactly one adapter.
#[derive(Default)]
pub struct SensorRegistry {
    adapters: Vec<Box<dyn SensorAdapter>>,

    /// Which adapter (index into `adapters`) provides each sensor
    owners: BTreeMap<SensorId, usize>,
}

/// The result of polling every adapter once.
#[derive(Debug, Default)]
pub struct PollResult {
    /// All readings returned by the adapters
    pub readings: Vec<SensorReading>,

    /// Errors returned by adapters which failed to read
    pub errors: Vec<SensorError>,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl SensorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the configured adapter list.
    ///
    /// `make` creates the adapter for each spec. The capability of the created adapter must
    /// match the configured kind.
    pub fn from_specs<F>(specs: &[AdapterSpec], mut make: F) -> Result<Self, SensorError>
    where
        F: FnMut(&AdapterSpec) -> Box<dyn SensorAdapter>,
    {
        let mut registry = Self::new();

        for spec in specs {
            let adapter = make(spec);

            if adapter.capability() != spec.kind {
                return Err(SensorError::KindMismatch {
                    adapter: spec.name.clone(),
                    expected: spec.kind,
                    found: adapter.capability(),
                });
            }

            registry.register(adapter)?;
        }

        Ok(registry)
    }

    /// Add an adapter to the registry.
    pub fn register(&mut self, adapter: Box<dyn SensorAdapter>) -> Result<(), SensorError> {
        let index = self.adapters.len();
        let ids = adapter.sensor_ids();

        for id in ids.iter() {
            if !adapter.capability().provides(*id) {
                return Err(SensorError::CapabilityMismatch {
                    adapter: adapter.name().to_string(),
                    capability: adapter.capability(),
                    id: *id,
                });
            }

            if self.owners.contains_key(id) {
                return Err(SensorError::DuplicateSensor {
                    id: *id,
                    adapter: adapter.name().to_string(),
                });
            }
        }

        for id in ids.iter() {
            self.owners.insert(*id, index);
        }

        info!(
            "Registered sensor adapter \"{}\" ({:?}) providing {:?}",
            adapter.name(),
            adapter.capability(),
            ids
        );

        self.adapters.push(adapter);

        Ok(())
    }

    /// Every sensor provided by the registered adapters.
    pub fn sensor_ids(&self) -> Vec<SensorId> {
        self.owners.keys().copied().collect()
    }

    /// True if some adapter provides the given capability.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.adapters.iter().any(|a| a.capability() == capability)
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Poll every adapter once.
    ///
    /// Readings for sensors an adapter does not own are discarded with a warning.
    pub fn poll_all(&mut self, now_s: f64) -> PollResult {
        let mut result = PollResult::default();

        for (index, adapter) in self.adapters.iter_mut().enumerate() {
            match adapter.poll(now_s) {
                Ok(readings) => {
                    for r in readings {
                        if self.owners.get(&r.id) == Some(&index) {
                            result.readings.push(r);
                        } else {
                            warn!(
                                "Adapter \"{}\" produced a reading for {:?} which it does not own",
                                adapter.name(),
                                r.id
                            );
                        }
                    }
                }
                Err(e) => result.errors.push(e),
            }
        }

        result
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// An adapter which returns a fixed value for each of its sensors.
    pub(crate) struct FixedAdapter {
        pub name: String,
        pub capability: Capability,
        pub ids: Vec<SensorId>,
        pub value: f64,
        pub fail: bool,
    }

    impl SensorAdapter for FixedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn capability(&self) -> Capability {
            self.capability
        }

        fn sensor_ids(&self) -> Vec<SensorId> {
            self.ids.clone()
        }

        fn poll(&mut self, now_s: f64) -> Result<Vec<SensorReading>, SensorError> {
            if self.fail {
                return Err(SensorError::ReadError {
                    adapter: self.name.clone(),
                    reason: "unplugged".into(),
                });
            }

            Ok(self
                .ids
                .iter()
                .map(|id| SensorReading {
                    id: *id,
                    timestamp_s: now_s,
                    value: self.value,
                })
                .collect())
        }
    }

    fn fixed(name: &str, capability: Capability, ids: &[SensorId]) -> Box<FixedAdapter> {
        Box::new(FixedAdapter {
            name: name.into(),
            capability,
            ids: ids.to_vec(),
            value: 50.0,
            fail: false,
        })
    }

    #[test]
    fn test_register_and_poll() {
        let mut reg = SensorRegistry::new();
        reg.register(fixed("ifs", Capability::Infrared, &SensorId::INFRAREDS))
            .unwrap();
        reg.register(fixed("imu", Capability::Imu, &[SensorId::Heading]))
            .unwrap();

        assert_eq!(reg.len(), 2);
        assert!(reg.has_capability(Capability::Imu));
        assert!(!reg.has_capability(Capability::Bumper));

        let result = reg.poll_all(1.0);
        assert_eq!(result.readings.len(), 6);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_duplicate_and_mismatch() {
        let mut reg = SensorRegistry::new();
        reg.register(fixed("a", Capability::Bumper, &SensorId::BUMPERS))
            .unwrap();

        assert!(matches!(
            reg.register(fixed("b", Capability::Bumper, &[SensorId::BumperCntr])),
            Err(SensorError::DuplicateSensor { .. })
        ));
        assert!(matches!(
            reg.register(fixed("c", Capability::Imu, &[SensorId::InfraredCntr])),
            Err(SensorError::CapabilityMismatch { .. })
        ));
    }

    #[test]
    fn test_from_specs_kind_mismatch() {
        let specs = vec![AdapterSpec {
            name: "front".into(),
            kind: Capability::Infrared,
        }];

        let result = SensorRegistry::from_specs(&specs, |s| -> Box<dyn SensorAdapter> {
            fixed(&s.name, Capability::Bumper, &SensorId::BUMPERS)
        });
        assert!(matches!(result, Err(SensorError::KindMismatch { .. })));
    }

    #[test]
    fn test_failed_adapter_reported() {
        let mut reg = SensorRegistry::new();
        let mut a = fixed("ifs", Capability::Infrared, &SensorId::INFRAREDS);
        a.fail = true;
        reg.register(a).unwrap();

        let result = reg.poll_all(0.5);
        assert!(result.readings.is_empty());
        assert_eq!(result.errors.len(), 1);
    }
}
