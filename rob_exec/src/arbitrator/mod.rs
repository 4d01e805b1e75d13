//! # Arbitrator module
//!
//! The arbitrator collects the motion requests emitted by the behaviours and resolves them into
//! exactly one [`ArbitratedCommand`](comms_if::msg::ArbitratedCommand) per normal cycle. The
//! highest priority valid request wins, ties going to the most recently collected.
//!
//! Ballistic requests are also checked on a faster cadence. An accepted ballistic request is
//! dispatched immediately and latched for its validity window, during which it is the command of
//! every normal cycle. Only a higher priority ballistic request can replace a latched one.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod state;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use params::*;
pub use state::*;

use serde::Serialize;

use crate::behav::MotionRequest;

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// The arbitrator's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArbState {
    Idle,
    Collecting,
    Resolving,
    Dispatching,
}

/// Which of the two cadences a processing pass belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cadence {
    /// Full arbitration, always dispatches one command
    Normal,

    /// Ballistic-capable behaviours only, dispatches only when a ballistic request is accepted
    Ballistic,
}

/// Errors which can occur during arbitration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArbitratorError {
    #[error("Collection timed out after polling {polled} of {total} behaviours")]
    CollectionTimeout { polled: usize, total: usize },

    #[error("The arbitrator has no behaviours, was it initialised?")]
    NoBehaviours,

    #[error("Behaviour priorities are not auditable: {0}")]
    PriorityOrder(String),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Select the winning request for the given cycle.
///
/// Requests which are not valid on `cycle` are never selected. Of the rest the highest priority
/// wins, and of equal priorities the one with the greatest stamp (most recent) wins.
pub fn resolve<'a, I>(requests: I, cycle: u64) -> Option<MotionRequest>
where
    I: IntoIterator<Item = &'a MotionRequest>,
{
    requests
        .into_iter()
        .filter(|r| r.is_valid(cycle))
        .max_by(|a, b| (a.priority, a.stamp).cmp(&(b.priority, b.stamp)))
        .copied()
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::msg::BehaviourId;

    fn request(behaviour: BehaviourId, priority: i32, v: f64, issued: u64, stamp: u64) -> MotionRequest {
        let mut r = MotionRequest::new(behaviour, priority, v, 0.0, 2);
        r.issued_cycle = issued;
        r.stamp = stamp;
        r
    }

    #[test]
    fn test_highest_priority_wins() {
        let reqs = vec![
            request(BehaviourId::Cruise, 1, 50.0, 4, 0),
            request(BehaviourId::Avoidance, 5, 0.0, 4, 1),
        ];

        let w = resolve(&reqs, 4).unwrap();
        assert_eq!(w.behaviour, BehaviourId::Avoidance);
        assert_eq!(w.linear_cm_s, 0.0);
    }

    #[test]
    fn test_tie_goes_to_most_recent() {
        let reqs = vec![
            request(BehaviourId::Cruise, 3, 10.0, 4, 7),
            request(BehaviourId::Targeting, 3, 20.0, 4, 9),
            request(BehaviourId::Idle, 0, 0.0, 4, 12),
        ];

        assert_eq!(resolve(&reqs, 4).unwrap().behaviour, BehaviourId::Targeting);
    }

    #[test]
    fn test_expired_never_selected() {
        // Valid on cycles 1 and 2 only
        let reqs = vec![request(BehaviourId::Avoidance, 9, 0.0, 1, 0)];

        assert!(resolve(&reqs, 2).is_some());
        assert!(resolve(&reqs, 3).is_none());

        let reqs = vec![
            request(BehaviourId::Avoidance, 9, 0.0, 1, 0),
            request(BehaviourId::Cruise, 1, 50.0, 3, 1),
        ];
        assert_eq!(resolve(&reqs, 3).unwrap().behaviour, BehaviourId::Cruise);
    }

    #[test]
    fn test_exactly_one_selected_from_many() {
        let reqs: Vec<MotionRequest> = (0..20)
            .map(|i| request(BehaviourId::Cruise, (i * 7 % 11) as i32, i as f64, 0, i))
            .collect();

        let w = resolve(&reqs, 0).unwrap();
        let max_priority = reqs.iter().map(|r| r.priority).max().unwrap();
        assert_eq!(w.priority, max_priority);
        assert!(reqs
            .iter()
            .filter(|r| r.priority == max_priority)
            .all(|r| r.stamp <= w.stamp));
    }
}
