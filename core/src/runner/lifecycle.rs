//! Actor lifecycle state machine (spec §4.3): `stopped → starting →
//! running → stopping → stopped`, plus `crashed` as a terminal inside
//! `stopped`.

use crate::error::{CcccError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }

    /// `crashed` is treated as stopped for the purpose of "may we start".
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }

    /// Validates a requested transition without mutating; callers hold
    /// the authoritative `LifecycleState` and swap it in after any
    /// side-effecting work (spawn, kill) succeeds.
    pub fn validate_transition(&self, to: LifecycleState) -> Result<()> {
        let ok = matches!(
            (self, to),
            (Self::Stopped, Self::Starting)
                | (Self::Crashed, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Starting, Self::Crashed)
                | (Self::Running, Self::Stopping)
                | (Self::Running, Self::Crashed)
                | (Self::Stopping, Self::Stopped)
        );
        if ok {
            Ok(())
        } else {
            Err(CcccError::invalid_payload(format!(
                "illegal actor lifecycle transition: {} -> {}",
                self.as_str(),
                to.as_str()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_start_stop_cycle_is_valid() {
        assert!(LifecycleState::Stopped.validate_transition(LifecycleState::Starting).is_ok());
        assert!(LifecycleState::Starting.validate_transition(LifecycleState::Running).is_ok());
        assert!(LifecycleState::Running.validate_transition(LifecycleState::Stopping).is_ok());
        assert!(LifecycleState::Stopping.validate_transition(LifecycleState::Stopped).is_ok());
    }

    #[test]
    fn crashed_is_a_terminal_reachable_from_starting_or_running() {
        assert!(LifecycleState::Starting.validate_transition(LifecycleState::Crashed).is_ok());
        assert!(LifecycleState::Running.validate_transition(LifecycleState::Crashed).is_ok());
        assert!(LifecycleState::Crashed.validate_transition(LifecycleState::Starting).is_ok());
    }

    #[test]
    fn skipping_starting_is_invalid() {
        assert!(LifecycleState::Stopped.validate_transition(LifecycleState::Running).is_err());
    }
}
