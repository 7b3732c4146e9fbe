//! Command consumer: the only place side effects reach routing, storage
//! and listeners.

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use super::AudioPolicyService;
use crate::boundary::PolicyEvent;
use crate::device::Device;
use crate::pipeline::{Command, PERSIST_DELAY};
use crate::safe_volume::{MUSIC_ACTIVE_MS_KEY, SAFE_VOLUME_STATE_KEY};
use crate::store::MODE_RINGER_KEY;
use crate::stream::{to_ui, StreamKind};

impl AudioPolicyService {
    pub(super) fn process_command(&self, command: Command) {
        debug!(kind = ?command.kind(), "command");
        match command {
            Command::SetDeviceVolume { stream, device } => self.set_device_volume(stream, device),
            Command::SetAllVolumes { stream } => {
                let streams = self.streams.lock();
                streams.apply_all_volumes(stream);
                for follower in streams.aliases().followers(stream) {
                    streams.apply_all_volumes(follower);
                }
            }
            Command::PersistVolume { stream, device } => self.persist_volume(stream, device),
            Command::PersistRingerMode => {
                let mode = self.ringer.lock().internal;
                self.put_setting(MODE_RINGER_KEY, mode.as_i32());
            }
            Command::PersistSetting { key, value } => self.put_setting(&key, value),
            Command::SetForceUse { usage, config } => {
                if let Err(e) = self.routing.set_force_use(usage, config) {
                    warn!(?usage, ?config, "set force use failed: {}", e);
                }
            }
            Command::MediaServerDied => self.restore_media_server(),
            Command::SetWiredDeviceConnectionState {
                device,
                connected,
                address,
                name,
            } => self.on_set_wired_device_connection_state(device, connected, &address, &name),
            Command::BroadcastBecomingNoisy => self.events.publish(PolicyEvent::BecomingNoisy),
            Command::UnmuteStream { stream, flags } => {
                self.streams.lock().mute(stream, false);
                self.controller.volume_changed(stream, flags);
            }
            Command::CheckMusicActive => {
                let music_active = self
                    .routing
                    .is_stream_active(StreamKind::Music, std::time::Duration::ZERO);
                let mut guard = self.safe_volume.lock();
                let mut streams = self.streams.lock();
                guard.on_check_music_active(&mut streams, music_active);
            }
            Command::ConfigureSafeVolume => self.configure_safe_volume(false),
            Command::ConfigureSafeVolumeForced => self.configure_safe_volume(true),
            Command::PersistSafeVolumeState { state } => {
                self.put_setting(SAFE_VOLUME_STATE_KEY, state as i32);
            }
            Command::PersistMusicActiveMs { ms } => {
                self.put_setting(MUSIC_ACTIVE_MS_KEY, i32::try_from(ms).unwrap_or(i32::MAX));
            }
            Command::BroadcastScoState { state } => {
                let delivered = self.sco.lock().deliver_broadcast(state);
                if let Some((state, previous)) = delivered {
                    self.events
                        .publish(PolicyEvent::ScoStateChanged { state, previous });
                }
            }
            Command::HeadsetConnectFailed => {
                warn!("headset did not answer, resetting sco");
                self.reset_bluetooth_sco();
            }
        }
    }

    /// Apply one device volume, then the same for every stream following
    /// it on that stream's own device.
    fn set_device_volume(&self, stream: StreamKind, device: Device) {
        {
            let streams = self.streams.lock();
            streams.apply_device_volume(stream, device);
            for follower in streams.aliases().followers(stream) {
                let follower_device = streams.device_for_stream(follower);
                streams.apply_device_volume(follower, follower_device);
            }
        }
        self.queue
            .send(Command::PersistVolume { stream, device }, PERSIST_DELAY);
    }

    fn persist_volume(&self, stream: StreamKind, device: Device) {
        if self.config.use_fixed_volume {
            return;
        }
        if self.is_television() && stream != StreamKind::Music {
            return;
        }
        let (key, index) = {
            let streams = self.streams.lock();
            let state = streams.state(stream);
            (state.settings_key(device), state.get_index(device))
        };
        self.put_setting(&key, to_ui(index));
    }

    fn configure_safe_volume(&self, force: bool) {
        let jurisdiction = self.jurisdiction.load(Ordering::SeqCst);
        let mut guard = self.safe_volume.lock();
        let mut streams = self.streams.lock();
        guard.configure(jurisdiction, force, &mut streams);
    }

    fn put_setting(&self, key: &str, value: i32) {
        if let Err(e) = self.settings.put_int(key, value) {
            warn!(key, "persist failed: {}", e);
        }
    }
}
