use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed lifecycle of a service process.
///
/// `Queued → Preparing → Starting → {Visible | Invisible} → Closed`. Visible
/// and Invisible are both running; a process may move between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Queued,
    Preparing,
    Starting,
    Visible,
    Invisible,
    Closed,
}

impl ServiceState {
    fn rank(self) -> u8 {
        match self {
            ServiceState::Queued => 0,
            ServiceState::Preparing => 1,
            ServiceState::Starting => 2,
            ServiceState::Visible | ServiceState::Invisible => 3,
            ServiceState::Closed => 4,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, ServiceState::Visible | ServiceState::Invisible)
    }

    /// Whether the process no longer occupies an admission slot.
    pub fn has_left_starting(self) -> bool {
        matches!(
            self,
            ServiceState::Visible | ServiceState::Invisible | ServiceState::Closed
        )
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        next.rank() > self.rank() || (self.is_running() && next.is_running() && self != next)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Queued => "QUEUED",
            ServiceState::Preparing => "PREPARING",
            ServiceState::Starting => "STARTING",
            ServiceState::Visible => "VISIBLE",
            ServiceState::Invisible => "INVISIBLE",
            ServiceState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_is_monotonic() {
        use ServiceState::*;
        assert!(Queued.can_transition_to(Preparing));
        assert!(Queued.can_transition_to(Closed));
        assert!(Starting.can_transition_to(Invisible));
        assert!(Visible.can_transition_to(Invisible));
        assert!(Invisible.can_transition_to(Visible));
        assert!(!Visible.can_transition_to(Starting));
        assert!(!Closed.can_transition_to(Visible));
        assert!(!Starting.can_transition_to(Starting));
    }

    #[test]
    fn test_only_post_starting_states_free_a_slot() {
        use ServiceState::*;
        for state in [Queued, Preparing, Starting] {
            assert!(!state.has_left_starting(), "{state}");
        }
        for state in [Visible, Invisible, Closed] {
            assert!(state.has_left_starting(), "{state}");
        }
        assert_eq!(serde_json::to_value(Invisible).unwrap(), "INVISIBLE");
    }
}
