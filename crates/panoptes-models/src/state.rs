//! Pipeline lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one camera pipeline.
///
/// Transitions are monotonic:
///
/// ```text
/// Created ──start()──► Running ──stop()/EOS──► Draining ──► Stopped
///    │                    │
///    └──stop()──► Stopped └──fatal error──► Failed
/// ```
///
/// `Draining` can only move to `Stopped`; a pipeline never re-enters
/// `Running`. `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Created,
    Running,
    Draining,
    Stopped,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Created => "created",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Stopped => "stopped",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Failed)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Created, Stopped)
                | (Running, Draining)
                | (Running, Failed)
                | (Draining, Stopped)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn test_lifecycle_lattice() {
        assert!(Created.can_transition(Running));
        assert!(Created.can_transition(Stopped));
        assert!(Running.can_transition(Draining));
        assert!(Running.can_transition(Failed));
        assert!(Draining.can_transition(Stopped));
    }

    #[test]
    fn test_draining_is_not_reenterable() {
        assert!(!Draining.can_transition(Running));
        assert!(!Draining.can_transition(Failed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [Created, Running, Draining, Stopped, Failed] {
            assert!(!Stopped.can_transition(next));
            assert!(!Failed.can_transition(next));
        }
        assert!(Stopped.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Draining.is_terminal());
    }
}
