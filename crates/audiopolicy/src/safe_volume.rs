//! Headphone safe volume guard.
//!
//! While ACTIVE, music on a guarded device may not exceed the cap. The
//! user can confirm an override (INACTIVE); cumulative loud listening
//! after that is polled and, past a ceiling, the cap comes back.

use std::fmt;
use std::time::Duration;

use policyconf::SafeVolumeConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::device::Device;
use crate::pipeline::{Command, CommandQueue};
use crate::ringer::AdjustFlags;
use crate::store::SettingsStore;
use crate::stream::StreamKind;
use crate::volume::StreamTable;

pub const SAFE_VOLUME_STATE_KEY: &str = "audio_safe_volume_state";
pub const MUSIC_ACTIVE_MS_KEY: &str = "unsafe_volume_music_active_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafeVolumeState {
    NotConfigured = 0,
    Disabled = 1,
    /// Cap overridden by the user.
    Inactive = 2,
    /// Cap enforced.
    Active = 3,
}

impl SafeVolumeState {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(SafeVolumeState::NotConfigured),
            1 => Some(SafeVolumeState::Disabled),
            2 => Some(SafeVolumeState::Inactive),
            3 => Some(SafeVolumeState::Active),
            _ => None,
        }
    }
}

impl fmt::Display for SafeVolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SafeVolumeState::NotConfigured => "not_configured",
            SafeVolumeState::Disabled => "disabled",
            SafeVolumeState::Inactive => "inactive",
            SafeVolumeState::Active => "active",
        })
    }
}

/// A set-volume request held back by the guard until the user confirms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVolumeCommand {
    pub stream: StreamKind,
    /// Internal units of the stream's alias.
    pub index: i32,
    pub flags: AdjustFlags,
    pub device: Device,
}

pub struct SafeVolumeGuard {
    state: SafeVolumeState,
    safe_index: i32,
    music_active_ms: u64,
    jurisdiction: u32,
    pending: Option<PendingVolumeCommand>,
    devices: Device,
    config: SafeVolumeConfig,
    queue: CommandQueue,
}

impl SafeVolumeGuard {
    pub fn new(config: SafeVolumeConfig, queue: CommandQueue) -> Self {
        let safe_index = i32::try_from(config.index).unwrap_or(i32::MAX / 10) * 10;
        Self {
            state: SafeVolumeState::NotConfigured,
            safe_index,
            music_active_ms: 0,
            jurisdiction: 0,
            pending: None,
            devices: Device::SAFE_VOLUME,
            config,
            queue,
        }
    }

    /// Restore the persisted state and exposure counter.
    pub fn load(&mut self, store: &dyn SettingsStore) {
        let raw = store.get_int_or(SAFE_VOLUME_STATE_KEY, SafeVolumeState::NotConfigured as i32);
        self.state = SafeVolumeState::from_i32(raw).unwrap_or_else(|| {
            warn!(raw, "invalid persisted safe volume state");
            SafeVolumeState::NotConfigured
        });

        let ms = i64::from(store.get_int_or(MUSIC_ACTIVE_MS_KEY, 0));
        self.music_active_ms = ms.clamp(0, self.config.unsafe_max_ms as i64) as u64;
    }

    pub fn state(&self) -> SafeVolumeState {
        self.state
    }

    pub fn safe_index(&self) -> i32 {
        self.safe_index
    }

    pub fn music_active_ms(&self) -> u64 {
        self.music_active_ms
    }

    pub fn jurisdiction(&self) -> u32 {
        self.jurisdiction
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.config.poll_period_ms)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.config.configure_timeout_ms)
    }

    pub fn is_guarded(&self, device: Device) -> bool {
        device.intersects(self.devices)
    }

    /// Cap currently enforced on `device`, if any.
    pub fn active_cap(&self, device: Device) -> Option<i32> {
        (self.state == SafeVolumeState::Active && self.is_guarded(device)).then_some(self.safe_index)
    }

    /// False iff the guard would reject `index` on `device` for a stream
    /// whose alias is `alias`.
    pub fn check(&self, alias: StreamKind, index: i32, device: Device) -> bool {
        !(self.state == SafeVolumeState::Active
            && alias == StreamKind::Music
            && self.is_guarded(device)
            && index > self.safe_index)
    }

    pub fn pending(&self) -> Option<&PendingVolumeCommand> {
        self.pending.as_ref()
    }

    pub fn stash(&mut self, command: PendingVolumeCommand) {
        self.pending = Some(command);
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    pub fn take_pending(&mut self) -> Option<PendingVolumeCommand> {
        self.pending.take()
    }

    /// Clamp music on every guarded device down to the cap.
    pub fn enforce(&self, streams: &mut StreamTable) {
        for device in self.devices.split() {
            if streams.get_index(StreamKind::Music, device) > self.safe_index {
                streams.set_index(StreamKind::Music, self.safe_index, device);
                self.queue.send_now(Command::SetDeviceVolume {
                    stream: StreamKind::Music,
                    device,
                });
            }
        }
    }

    pub fn set_enabled(&mut self, on: bool, streams: &mut StreamTable) {
        if matches!(
            self.state,
            SafeVolumeState::NotConfigured | SafeVolumeState::Disabled
        ) {
            return;
        }
        if on && self.state == SafeVolumeState::Inactive {
            self.transition(SafeVolumeState::Active);
            self.enforce(streams);
        } else if !on && self.state == SafeVolumeState::Active {
            self.transition(SafeVolumeState::Inactive);
            // nonzero means confirmed
            self.music_active_ms = 1;
            self.save_music_active_ms();
            self.queue.send(Command::CheckMusicActive, self.poll_period());
        }
    }

    /// One poll tick. `music_active` is whether music is playing now.
    pub fn on_check_music_active(&mut self, streams: &mut StreamTable, music_active: bool) {
        if self.state != SafeVolumeState::Inactive {
            return;
        }
        let device = streams.device_for_stream(StreamKind::Music);
        if !self.is_guarded(device) {
            return;
        }

        self.queue.send(Command::CheckMusicActive, self.poll_period());
        let index = streams.get_index(StreamKind::Music, device);
        if music_active && index > self.safe_index {
            self.music_active_ms += self.config.poll_period_ms;
            if self.music_active_ms > self.config.unsafe_max_ms {
                self.set_enabled(true, streams);
                self.music_active_ms = 0;
            }
            self.save_music_active_ms();
        }
    }

    /// Re-evaluate the profile for `jurisdiction`. Runs when the code
    /// changed, or when forced while no code was ever seen.
    pub fn configure(&mut self, jurisdiction: u32, force: bool, streams: &mut StreamTable) {
        if self.jurisdiction == jurisdiction && !(self.jurisdiction == 0 && force) {
            return;
        }

        let (profile_enabled, index) = self.config.profile_for(jurisdiction);
        self.safe_index = i32::try_from(index).unwrap_or(i32::MAX / 10) * 10;
        let enabled = self.config.force || profile_enabled;

        // persisted state is never INACTIVE
        let persisted = if enabled && !self.config.bypass {
            if self.state != SafeVolumeState::Inactive {
                if self.music_active_ms == 0 {
                    self.transition(SafeVolumeState::Active);
                    self.enforce(streams);
                } else {
                    // exposure already recorded: the user confirmed before
                    self.transition(SafeVolumeState::Inactive);
                }
            }
            SafeVolumeState::Active
        } else {
            self.transition(SafeVolumeState::Disabled);
            SafeVolumeState::Disabled
        };

        self.jurisdiction = jurisdiction;
        self.queue
            .send_now(Command::PersistSafeVolumeState { state: persisted });
    }

    fn transition(&mut self, next: SafeVolumeState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "safe volume state");
            self.state = next;
        }
    }

    fn save_music_active_ms(&self) {
        self.queue.send_now(Command::PersistMusicActiveMs {
            ms: self.music_active_ms,
        });
    }
}
