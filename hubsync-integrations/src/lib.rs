pub mod ids;

use serde::{Deserialize, Serialize};

/// Lifecycle of the upload loop as seen by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl DaemonState {
    pub fn as_str(self) -> &'static str {
        match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stopped" => Some(DaemonState::Stopped),
            "starting" => Some(DaemonState::Starting),
            "running" => Some(DaemonState::Running),
            "stopping" => Some(DaemonState::Stopping),
            _ => None,
        }
    }

    /// Anything but `Stopped` holds the loop and blocks configuration edits.
    pub fn is_active(self) -> bool {
        !matches!(self, DaemonState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_round_trip() {
        for state in [
            DaemonState::Stopped,
            DaemonState::Starting,
            DaemonState::Running,
            DaemonState::Stopping,
        ] {
            assert_eq!(DaemonState::parse(state.as_str()), Some(state));
        }
        assert_eq!(DaemonState::parse("paused"), None);
    }

    #[test]
    fn only_stopped_is_inactive() {
        assert!(!DaemonState::Stopped.is_active());
        assert!(DaemonState::Starting.is_active());
        assert!(DaemonState::Stopping.is_active());
    }
}
