//! Audio mode ownership.
//!
//! The last session to ask for a non-normal mode sits on top of the stack.
//! Asking for NORMAL pops back to whatever the next owner wanted.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::boundary::{AudioRouting, ForceConfig};
use crate::error::PolicyError;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioMode {
    Normal = 0,
    Ringtone = 1,
    InCall = 2,
    InCommunication = 3,
}

impl AudioMode {
    /// Request code meaning "whatever the current mode is".
    pub const CURRENT: i32 = -1;

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for AudioMode {
    type Error = PolicyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AudioMode::Normal),
            1 => Ok(AudioMode::Ringtone),
            2 => Ok(AudioMode::InCall),
            3 => Ok(AudioMode::InCommunication),
            other => Err(PolicyError::InvalidAudioMode(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeOwner {
    pub session: SessionId,
    pub pid: u32,
    pub mode: AudioMode,
}

/// Outcome of a mode request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    /// Native state accepted a mode (possibly the fallback).
    pub applied: bool,
    /// Top owner's pid when the resulting mode is not NORMAL.
    pub owner_pid: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ModeOwners {
    owners: Vec<ModeOwner>,
    mode: AudioMode,
    forced_for_comm: ForceConfig,
}

impl Default for ModeOwners {
    fn default() -> Self {
        Self {
            owners: Vec::new(),
            mode: AudioMode::Normal,
            forced_for_comm: ForceConfig::None,
        }
    }
}

impl ModeOwners {
    pub fn mode(&self) -> AudioMode {
        self.mode
    }

    pub fn owners(&self) -> &[ModeOwner] {
        &self.owners
    }

    pub fn top(&self) -> Option<&ModeOwner> {
        self.owners.first()
    }

    pub fn owner_pid(&self) -> Option<u32> {
        self.top().map(|o| o.pid)
    }

    pub fn is_owner(&self, session: SessionId) -> bool {
        self.owners.iter().any(|o| o.session == session)
    }

    pub fn forced_for_comm(&self) -> ForceConfig {
        self.forced_for_comm
    }

    pub fn set_forced_for_comm(&mut self, config: ForceConfig) {
        self.forced_for_comm = config;
    }

    /// Apply `mode` on behalf of `session`. A native refusal drops the
    /// requesting owner and retries with whatever is left on the stack.
    pub fn set_mode(
        &mut self,
        mut mode: AudioMode,
        session: SessionId,
        pid: u32,
        routing: &dyn AudioRouting,
    ) -> ModeChange {
        let mut owner = self
            .owners
            .iter()
            .position(|o| o.session == session)
            .map(|slot| self.owners.remove(slot));

        let mut applied;
        loop {
            let mut on_stack = false;
            if mode == AudioMode::Normal {
                if let Some(top) = self.owners.first() {
                    mode = top.mode;
                    on_stack = true;
                }
            } else {
                let mut entry = owner.take().unwrap_or(ModeOwner {
                    session,
                    pid,
                    mode,
                });
                entry.mode = mode;
                self.owners.insert(0, entry);
                on_stack = true;
            }

            if mode == self.mode {
                applied = true;
            } else {
                match routing.set_phone_state(mode) {
                    Ok(()) => {
                        info!(from = ?self.mode, to = ?mode, "audio mode");
                        self.mode = mode;
                        applied = true;
                    }
                    Err(e) => {
                        warn!(?mode, "set phone state failed: {}", e);
                        if on_stack {
                            self.owners.remove(0);
                        }
                        mode = AudioMode::Normal;
                        applied = false;
                    }
                }
            }

            if applied || self.owners.is_empty() {
                break;
            }
        }

        let owner_pid = if applied && mode != AudioMode::Normal {
            self.owner_pid()
        } else {
            None
        };
        ModeChange { applied, owner_pid }
    }

    /// Drop a dead owner; the mode then falls back as if it asked for
    /// NORMAL.
    pub fn on_session_died(&mut self, session: SessionId, routing: &dyn AudioRouting) -> Option<ModeChange> {
        let owner = self.owners.iter().find(|o| o.session == session)?;
        let pid = owner.pid;
        warn!(%session, pid, "mode owner died");
        Some(self.set_mode(AudioMode::Normal, session, pid, routing))
    }

    /// Re-push the current mode to the native side after a restart.
    pub fn restore(&self, routing: &dyn AudioRouting) {
        if let Err(e) = routing.set_phone_state(self.mode) {
            warn!(mode = ?self.mode, "restore phone state failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecordingRouting;

    #[test]
    fn test_parse_mode() {
        assert_eq!(AudioMode::try_from(3).unwrap(), AudioMode::InCommunication);
        assert_eq!(
            AudioMode::try_from(7).unwrap_err(),
            PolicyError::InvalidAudioMode(7)
        );
    }

    #[test]
    fn test_latest_owner_on_top() {
        let routing = RecordingRouting::new();
        let mut owners = ModeOwners::default();
        let a = SessionId::new();
        let b = SessionId::new();

        let change = owners.set_mode(AudioMode::Ringtone, a, 1, &routing);
        assert_eq!(change.owner_pid, Some(1));
        let change = owners.set_mode(AudioMode::InCommunication, b, 2, &routing);
        assert_eq!(change.owner_pid, Some(2));
        assert_eq!(owners.mode(), AudioMode::InCommunication);

        // b releasing leaves a's ringtone
        let change = owners.set_mode(AudioMode::Normal, b, 2, &routing);
        assert_eq!(owners.mode(), AudioMode::Ringtone);
        assert_eq!(change.owner_pid, Some(1));
    }

    #[test]
    fn test_refused_mode_drops_owner() {
        let routing = RecordingRouting::new();
        let mut owners = ModeOwners::default();
        routing.refuse_phone_state(AudioMode::InCall);

        let change = owners.set_mode(AudioMode::InCall, SessionId::new(), 5, &routing);
        assert!(!change.applied);
        assert!(owners.owners().is_empty());
        assert_eq!(owners.mode(), AudioMode::Normal);
    }

    #[test]
    fn test_refusal_falls_back_to_previous_owner() {
        let routing = RecordingRouting::new();
        let mut owners = ModeOwners::default();
        let a = SessionId::new();
        owners.set_mode(AudioMode::InCommunication, a, 1, &routing);

        routing.refuse_phone_state(AudioMode::InCall);
        let change = owners.set_mode(AudioMode::InCall, SessionId::new(), 2, &routing);
        assert!(change.applied);
        assert_eq!(owners.mode(), AudioMode::InCommunication);
        assert_eq!(change.owner_pid, Some(1));
    }

    #[test]
    fn test_owner_death_restores_normal() {
        let routing = RecordingRouting::new();
        let mut owners = ModeOwners::default();
        let a = SessionId::new();
        owners.set_mode(AudioMode::InCommunication, a, 1, &routing);

        let change = owners.on_session_died(a, &routing).unwrap();
        assert!(change.applied);
        assert_eq!(owners.mode(), AudioMode::Normal);
        assert!(owners.on_session_died(a, &routing).is_none());
    }
}
