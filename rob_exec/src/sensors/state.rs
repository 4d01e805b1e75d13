//! Snapshot of the latest sensor data, built from bus events

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use comms_if::msg::{Event, PoseEstimate, SensorEvent, SensorId, Side};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// The latest known value of every sensor and the latest pose estimate.
///
/// Values are held until replaced, so a stale sensor keeps its last known reading.
#[derive(Debug, Clone, Default)]
pub struct SensorState {
    readings: BTreeMap<SensorId, SensorEvent>,

    pose: Option<PoseEstimate>,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl SensorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the snapshot from a bus event. Returns true if the event was relevant.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::Sensor(e) => {
                self.update(*e);
                true
            }
            Event::Pose(p) => {
                self.pose = Some(*p);
                true
            }
            _ => false,
        }
    }

    /// Replace the reading for the event's sensor.
    pub fn update(&mut self, event: SensorEvent) {
        self.readings.insert(event.source, event);
    }

    pub fn set_pose(&mut self, pose: PoseEstimate) {
        self.pose = Some(pose);
    }

    pub fn reading(&self, id: SensorId) -> Option<&SensorEvent> {
        self.readings.get(&id)
    }

    /// Distance measured by an infrared sensor in cm.
    pub fn distance_cm(&self, id: SensorId) -> Option<f64> {
        if id.is_infrared() {
            self.readings.get(&id).map(|e| e.value)
        } else {
            None
        }
    }

    pub fn is_triggered(&self, id: SensorId) -> bool {
        self.readings.get(&id).map(|e| e.triggered).unwrap_or(false)
    }

    /// The first pressed bumper, port to starboard.
    pub fn triggered_bumper(&self) -> Option<SensorId> {
        SensorId::BUMPERS
            .iter()
            .copied()
            .find(|id| self.is_triggered(*id))
    }

    /// True if any infrared sensor on the given side is triggered.
    pub fn infrared_triggered_on(&self, side: Side) -> bool {
        SensorId::INFRAREDS
            .iter()
            .any(|id| id.side() == Some(side) && self.is_triggered(*id))
    }

    pub fn any_infrared_triggered(&self) -> bool {
        SensorId::INFRAREDS.iter().any(|id| self.is_triggered(*id))
    }

    /// The shortest distance seen by the infrared sensors on one side, in cm.
    pub fn nearest_on(&self, side: Side) -> Option<f64> {
        SensorId::INFRAREDS
            .iter()
            .filter(|id| id.side() == Some(side))
            .filter_map(|id| self.distance_cm(*id))
            .fold(None, |acc: Option<f64>, d| match acc {
                Some(a) => Some(a.min(d)),
                None => Some(d),
            })
    }

    /// Distance to the target from the range sensor, in meters.
    pub fn target_range_m(&self) -> Option<f64> {
        self.readings
            .get(&SensorId::TargetRange)
            .map(|e| e.value * 0.01)
    }

    pub fn heading_rad(&self) -> Option<f64> {
        self.readings.get(&SensorId::Heading).map(|e| e.value)
    }

    pub fn pose(&self) -> Option<&PoseEstimate> {
        self.pose.as_ref()
    }

    /// Total distance travelled, zero before the first pose estimate.
    pub fn odometer_m(&self) -> f64 {
        self.pose.map(|p| p.odometer_m).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn event(source: SensorId, value: f64, triggered: bool) -> Event {
        Event::Sensor(SensorEvent {
            source,
            timestamp_s: 0.0,
            value,
            triggered,
        })
    }

    #[test]
    fn test_apply() {
        let mut s = SensorState::new();

        assert!(s.apply(&event(SensorId::InfraredPort, 25.0, true)));
        assert!(s.apply(&event(SensorId::InfraredPortSide, 60.0, false)));
        assert!(s.apply(&event(SensorId::BumperStbd, 1.0, true)));
        assert!(s.apply(&event(SensorId::TargetRange, 250.0, false)));
        assert!(!s.apply(&Event::Halt(comms_if::msg::HaltCause::Operator)));

        assert!(s.infrared_triggered_on(Side::Port));
        assert!(!s.infrared_triggered_on(Side::Stbd));
        assert_eq!(s.nearest_on(Side::Port), Some(25.0));
        assert_eq!(s.nearest_on(Side::Stbd), None);
        assert_eq!(s.triggered_bumper(), Some(SensorId::BumperStbd));
        assert_eq!(s.distance_cm(SensorId::BumperStbd), None);
        assert!((s.target_range_m().unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(s.odometer_m(), 0.0);
    }
}
