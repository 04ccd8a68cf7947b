//! Point-in-time view of the supervisor for status displays.

use serde::Serialize;
use wavetap_types::SessionState;

/// Snapshot returned by [`crate::ProcessSupervisor::snapshot`].
///
/// The auth token is deliberately absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub url: Option<String>,
    pub player_pid: Option<u32>,
    pub sampler_pid: Option<u32>,
    /// Sampler respawns in the current session.
    pub sampler_restarts: u64,
    /// Levels pushed in the current session.
    pub levels_produced: u64,
    pub current_level: f32,
    pub generation: u64,
}

impl SessionSnapshot {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Player still has a pid while the session is up.
    pub fn player_running(&self) -> bool {
        self.player_pid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_idle() {
        let snap = SessionSnapshot::default();
        assert!(!snap.is_active());
        assert!(!snap.player_running());
        assert_eq!(snap.generation, 0);
    }
}
