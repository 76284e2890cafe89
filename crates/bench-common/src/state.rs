//! Experiment lifecycle state machine.
//!
//! UNINITIALIZED → IDLE ⇄ RUNNING
//!
//! The transport enters IDLE once initialized. A start command moves it to
//! RUNNING; a stop command, a keepalive timeout or a lost link brings it
//! back to IDLE.

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Experiment states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    /// Transport not yet initialized.
    #[default]
    Uninitialized,
    /// Ready; waiting for a start command.
    Idle,
    /// Experiment running; the control loop advances time and sends data.
    Running,
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "UNINITIALIZED"),
            Self::Idle => write!(f, "IDLE"),
            Self::Running => write!(f, "RUNNING"),
        }
    }
}

impl ExperimentState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: ExperimentState) -> bool {
        use ExperimentState::{Idle, Running, Uninitialized};

        matches!(
            (self, target),
            (Uninitialized, Idle) | (Idle, Running) | (Running, Idle)
        )
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: ExperimentState,
    previous: Option<ExperimentState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in UNINITIALIZED.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ExperimentState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<ExperimentState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::InvalidStateTransition`] if `target` is not
    /// reachable from the current state.
    pub fn transition(&mut self, target: ExperimentState) -> BenchResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(BenchError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_cycle() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.state(), ExperimentState::Uninitialized);

        sm.transition(ExperimentState::Idle).unwrap();
        sm.transition(ExperimentState::Running).unwrap();
        sm.transition(ExperimentState::Idle).unwrap();
        sm.transition(ExperimentState::Running).unwrap();

        assert_eq!(sm.state(), ExperimentState::Running);
        assert_eq!(sm.previous_state(), Some(ExperimentState::Idle));
        assert_eq!(sm.transition_count(), 4);
    }

    #[test]
    fn test_cannot_start_before_init() {
        let mut sm = StateMachine::new();
        let result = sm.transition(ExperimentState::Running);
        assert_eq!(
            result,
            Err(BenchError::InvalidStateTransition {
                from: "UNINITIALIZED".into(),
                to: "RUNNING".into(),
            })
        );
        assert_eq!(sm.state(), ExperimentState::Uninitialized);
        assert_eq!(sm.transition_count(), 0);
    }

    #[test]
    fn test_self_transitions_rejected() {
        let mut sm = StateMachine::new();
        sm.transition(ExperimentState::Idle).unwrap();
        assert!(sm.transition(ExperimentState::Idle).is_err());

        sm.transition(ExperimentState::Running).unwrap();
        assert!(sm.transition(ExperimentState::Running).is_err());
    }

    #[test]
    fn test_no_way_back_to_uninitialized() {
        assert!(!ExperimentState::Idle.can_transition_to(ExperimentState::Uninitialized));
        assert!(!ExperimentState::Running.can_transition_to(ExperimentState::Uninitialized));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ExperimentState::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
        let parsed: ExperimentState = serde_json::from_str("\"IDLE\"").unwrap();
        assert_eq!(parsed, ExperimentState::Idle);
    }
}
