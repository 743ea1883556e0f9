//! Orchestrator state machine

use crate::error::ErrorKind;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lifecycle of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "kind")]
pub enum PipelineState {
    /// Not started
    Idle,
    /// Fetching the SSH credential
    ResolvingSecret,
    /// Authenticated session established
    SessionOpen,
    /// Listing taken, files being transferred
    Processing,
    /// All admitted files finished, session closing
    Draining,
    /// Report assembled
    Done,
    /// Invocation aborted by a session-level failure
    FatalError(ErrorKind),
}

impl PipelineState {
    /// Whether the invocation has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::FatalError(_))
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, ResolvingSecret) => true,
            (ResolvingSecret, SessionOpen) => true,
            (SessionOpen, Processing) => true,
            (Processing, Draining) => true,
            (Draining, Done) => true,
            (ResolvingSecret | SessionOpen, FatalError(_)) => true,
            // Config errors surface before the secret is fetched
            (Idle, FatalError(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FatalError(kind) => write!(f, "FatalError({})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Tracks and logs state transitions for one invocation
#[derive(Debug)]
pub struct StateMachine {
    current: PipelineState,
    history: Vec<PipelineState>,
}

impl StateMachine {
    /// Start in [`PipelineState::Idle`]
    pub fn new() -> Self {
        Self {
            current: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    /// Current state
    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to `next`, logging the transition
    pub fn advance(&mut self, next: PipelineState) {
        if !self.current.can_transition_to(next) {
            warn!(from = %self.current, to = %next, "Unexpected state transition");
        }

        if next.is_terminal() {
            info!(from = %self.current, to = %next, "Pipeline finished");
        } else {
            debug!(from = %self.current, to = %next, "Pipeline state changed");
        }

        self.current = next;
        self.history.push(next);
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut machine = StateMachine::new();
        for state in [
            PipelineState::ResolvingSecret,
            PipelineState::SessionOpen,
            PipelineState::Processing,
            PipelineState::Draining,
            PipelineState::Done,
        ] {
            assert!(machine.current().can_transition_to(state));
            machine.advance(state);
        }
        assert!(machine.current().is_terminal());
        assert_eq!(machine.history().len(), 6);
    }

    #[test]
    fn test_fatal_transitions() {
        let fatal = PipelineState::FatalError(ErrorKind::DirectoryNotFound);
        assert!(PipelineState::SessionOpen.can_transition_to(fatal));
        assert!(PipelineState::ResolvingSecret.can_transition_to(fatal));
        assert!(!PipelineState::Processing.can_transition_to(fatal));
        assert!(!PipelineState::Done.can_transition_to(PipelineState::Idle));
    }

    #[test]
    fn test_display() {
        let fatal = PipelineState::FatalError(ErrorKind::SecretMalformed);
        assert_eq!(fatal.to_string(), "FatalError(SecretMalformed)");
        assert_eq!(PipelineState::Draining.to_string(), "Draining");
    }
}
