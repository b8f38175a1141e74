//! Worker lifecycle state machine.

use serde::{Deserialize, Serialize};

/// State of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Created but not yet started.
    Idle,
    /// Invoking `working()` in a loop.
    Running,
    /// Cancellation signalled, waiting for the loop to exit.
    Stopping,
    /// Loop exited or the bounded wait elapsed.
    Stopped,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Idle, Running) | (Idle, Stopped) |
            (Running, Stopping) |
            (Stopping, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Running or on its way out.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(WorkerState::Idle.can_transition_to(WorkerState::Running));
        assert!(WorkerState::Running.can_transition_to(WorkerState::Stopping));
        assert!(WorkerState::Stopping.can_transition_to(WorkerState::Stopped));
        assert!(WorkerState::Idle.can_transition_to(WorkerState::Stopped));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!WorkerState::Stopped.can_transition_to(WorkerState::Running));
        assert!(!WorkerState::Running.can_transition_to(WorkerState::Idle));
        assert!(!WorkerState::Stopping.can_transition_to(WorkerState::Running));
        assert!(!WorkerState::Running.can_transition_to(WorkerState::Stopped));
    }

    #[test]
    fn terminal_and_active() {
        assert!(WorkerState::Stopped.is_terminal());
        assert!(!WorkerState::Running.is_terminal());
        assert!(WorkerState::Stopping.is_active());
        assert!(!WorkerState::Idle.is_active());
    }

    #[test]
    fn state_display() {
        assert_eq!(WorkerState::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_string(&WorkerState::Stopping).unwrap(),
            "\"stopping\""
        );
    }
}
