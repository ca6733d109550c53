//! Pipeline state machine
//!
//! Stage progression for one run:
//! `ResolvingVersion → CheckingMarker → (ShortCircuit | Fetching) →
//! Transforming → BuildingManifest → Signing → Publishing → Invalidating →
//! Done`, with `Failed` reachable from every non-terminal state. The
//! tracker validates each transition so a stage can never be skipped by
//! accident.

/// Pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteState {
    ResolvingVersion,
    CheckingMarker,
    /// The marker already records the resolved release; exit successfully
    /// with zero writes
    ShortCircuit,
    Fetching,
    Transforming,
    BuildingManifest,
    Signing,
    Publishing,
    Invalidating,
    Done,
    Failed,
}

impl PromoteState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PromoteState::ShortCircuit | PromoteState::Done | PromoteState::Failed
        )
    }

    /// Whether moving from this state to `target` is a legal progression
    pub fn can_transition_to(&self, target: PromoteState) -> bool {
        use PromoteState::*;
        if self.is_terminal() {
            return false;
        }
        if target == Failed {
            return true;
        }
        matches!(
            (*self, target),
            (ResolvingVersion, CheckingMarker)
                | (CheckingMarker, ShortCircuit)
                | (CheckingMarker, Fetching)
                | (Fetching, Transforming)
                | (Transforming, BuildingManifest)
                | (BuildingManifest, Signing)
                | (Signing, Publishing)
                | (Publishing, Invalidating)
                | (Invalidating, Done)
        )
    }
}

/// Errors from state tracking
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid pipeline transition from {from:?} to {to:?}")]
    InvalidTransition { from: PromoteState, to: PromoteState },
}

/// Tracks the current stage of a run and validates progressions
#[derive(Debug)]
pub struct StateTracker {
    state: PromoteState,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: PromoteState::ResolvingVersion,
        }
    }

    pub fn state(&self) -> PromoteState {
        self.state
    }

    pub fn advance(&mut self, to: PromoteState) -> Result<(), StateError> {
        if !self.state.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PromoteState::*;

    #[test]
    fn test_full_publish_progression() {
        let mut tracker = StateTracker::new();
        for state in [
            CheckingMarker,
            Fetching,
            Transforming,
            BuildingManifest,
            Signing,
            Publishing,
            Invalidating,
            Done,
        ] {
            tracker.advance(state).unwrap();
        }
        assert_eq!(tracker.state(), Done);
        assert!(tracker.state().is_terminal());
    }

    #[test]
    fn test_short_circuit_progression() {
        let mut tracker = StateTracker::new();
        tracker.advance(CheckingMarker).unwrap();
        tracker.advance(ShortCircuit).unwrap();
        assert!(tracker.state().is_terminal());
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal_state() {
        for state in [
            ResolvingVersion,
            CheckingMarker,
            Fetching,
            Transforming,
            BuildingManifest,
            Signing,
            Publishing,
            Invalidating,
        ] {
            assert!(state.can_transition_to(Failed), "{:?}", state);
        }
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut tracker = StateTracker::new();
        tracker.advance(CheckingMarker).unwrap();
        let err = tracker.advance(Publishing).unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [ShortCircuit, Done, Failed] {
            assert!(!terminal.can_transition_to(Fetching));
            assert!(!terminal.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_marker_check_branches() {
        assert!(CheckingMarker.can_transition_to(ShortCircuit));
        assert!(CheckingMarker.can_transition_to(Fetching));
        assert!(!Fetching.can_transition_to(ShortCircuit));
    }
}
