//! Device connections, audio mode and native restarts.

use std::collections::BTreeMap;
use std::time::Duration;

use policyconf::PlatformKind;
use tracing::{error, info, warn};

use super::AudioPolicyService;
use crate::boundary::{AudioRouting, ForceConfig, ForceUsage, PolicyEvent};
use crate::device::Device;
use crate::error::PolicyError;
use crate::mode::AudioMode;
use crate::pipeline::{Command, BECOMING_NOISY_DELAY, MEDIA_SERVER_RETRY_DELAY};
use crate::session::Session;
use crate::stream::StreamKind;

/// Devices currently reported available to routing, keyed by device and
/// address.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    connected: BTreeMap<(Device, String), String>,
}

impl DeviceRegistry {
    pub fn is_connected(&self, device: Device, address: &str) -> bool {
        self.connected.contains_key(&(device, address.to_string()))
    }

    /// `(device, address, name)` of every connected device.
    pub fn entries(&self) -> impl Iterator<Item = (Device, &str, &str)> {
        self.connected
            .iter()
            .map(|((device, address), name)| (*device, address.as_str(), name.as_str()))
    }

    /// Union of every connected output.
    pub fn connected_outputs(&self) -> Device {
        self.connected
            .keys()
            .map(|(device, _)| *device)
            .filter(|device| !device.is_input())
            .fold(Device::NONE, |acc, device| acc | device)
    }

    /// Report a connection change to routing and record it. False when
    /// the change is redundant or routing refused a connect.
    pub fn handle_connection(
        &mut self,
        routing: &dyn AudioRouting,
        connect: bool,
        device: Device,
        address: &str,
        name: &str,
    ) -> bool {
        let key = (device, address.to_string());
        let known = self.connected.contains_key(&key);

        if connect && !known {
            if let Err(e) = routing.set_device_connection_state(device, true, address, name) {
                error!(%device, address, "connect refused: {}", e);
                return false;
            }
            self.connected.insert(key, name.to_string());
            true
        } else if !connect && known {
            if let Err(e) = routing.set_device_connection_state(device, false, address, name) {
                warn!(%device, address, "disconnect failed: {}", e);
            }
            self.connected.remove(&key);
            true
        } else {
            false
        }
    }
}

impl AudioPolicyService {
    // === Wired devices ===

    /// Wired device plugged or unplugged. When this unplug leaves no noisy
    /// output, apps hear about it first and routing follows after a delay.
    pub fn set_wired_device_connection_state(
        &self,
        device: Device,
        connected: bool,
        address: &str,
        name: &str,
    ) {
        let delay = {
            let devices = self.devices.lock();
            self.check_becoming_noisy(&devices, device, connected)
        };
        self.queue.send(
            Command::SetWiredDeviceConnectionState {
                device,
                connected,
                address: address.to_string(),
                name: name.to_string(),
            },
            delay,
        );
    }

    fn check_becoming_noisy(
        &self,
        devices: &DeviceRegistry,
        device: Device,
        connected: bool,
    ) -> Duration {
        if connected || !device.intersects(Device::NOISY) {
            return Duration::ZERO;
        }
        let noisy = devices.connected_outputs() & Device::NOISY;
        if noisy != device {
            return Duration::ZERO;
        }
        info!(%device, "last noisy output leaving");
        self.queue.send_now(Command::BroadcastBecomingNoisy);
        BECOMING_NOISY_DELAY
    }

    pub(super) fn on_set_wired_device_connection_state(
        &self,
        device: Device,
        connected: bool,
        address: &str,
        name: &str,
    ) {
        let handled = {
            let mut devices = self.devices.lock();
            devices.handle_connection(self.routing.as_ref(), connected, device, address, name)
        };
        if !handled {
            return;
        }

        if connected {
            let guarded = self.safe_volume.lock().is_guarded(device);
            if guarded {
                let period = self.safe_volume.lock().poll_period();
                self.queue.send(Command::CheckMusicActive, period);
            }
            if self.is_television() && device.intersects(Device::HDMI) {
                let mut streams = self.streams.lock();
                streams.add_fixed_volume_devices(Device::HDMI);
                streams.check_fixed_volume_devices();
            }
        }

        let is_usb = !device.is_input() && (device & !Device::ALL_USB).is_empty();
        if !is_usb && device != Device::IN_WIRED_HEADSET {
            self.events.publish(PolicyEvent::DeviceConnectionChanged {
                device,
                connected,
                address: address.to_string(),
                name: name.to_string(),
            });
        }
    }

    // === Audio mode ===

    /// Request an audio mode for `session`. `AudioMode::CURRENT` re-asserts
    /// whatever is in effect.
    pub fn set_mode(&self, mode: i32, session: &Session) -> Result<(), PolicyError> {
        let requested = if mode == AudioMode::CURRENT {
            self.modes.lock().mode()
        } else {
            AudioMode::try_from(mode)?
        };

        let change = {
            let mut modes = self.modes.lock();
            modes.set_mode(requested, session.id, session.pid, self.routing.as_ref())
        };
        self.after_mode_change(change);
        Ok(())
    }

    pub fn get_mode(&self) -> AudioMode {
        self.modes.lock().mode()
    }

    /// Stream the volume keys drive when no stream is named.
    pub fn active_stream_type(&self, suggested: Option<StreamKind>) -> StreamKind {
        let in_communication = self.is_in_communication();
        let communication_stream = if self.forced_for_communication() == ForceConfig::BtSco {
            StreamKind::BluetoothSco
        } else {
            StreamKind::VoiceCall
        };
        let delay = self.config.stream_override_delay;
        let recent_music = || self.routing.is_stream_active(StreamKind::Music, delay);
        let keys_ring = self.config.volume_keys_control_ring_stream;

        match self.config.platform {
            PlatformKind::Voice => {
                if in_communication {
                    communication_stream
                } else if let Some(stream) = suggested {
                    if self.routing.is_stream_active(StreamKind::Music, Duration::ZERO) {
                        StreamKind::Music
                    } else {
                        stream
                    }
                } else if recent_music() {
                    StreamKind::Music
                } else if keys_ring {
                    StreamKind::Ring
                } else {
                    StreamKind::Music
                }
            }
            PlatformKind::Television => suggested.unwrap_or(StreamKind::Music),
            PlatformKind::Default => {
                if in_communication {
                    communication_stream
                } else if self.routing.is_stream_active(StreamKind::Notification, delay)
                    || self.routing.is_stream_active(StreamKind::Ring, delay)
                {
                    StreamKind::Notification
                } else if let Some(stream) = suggested {
                    stream
                } else if recent_music() {
                    StreamKind::Music
                } else if keys_ring {
                    StreamKind::Notification
                } else {
                    StreamKind::Music
                }
            }
        }
    }

    // === Native restarts ===

    /// The native audio side restarted and lost everything.
    pub fn on_media_server_died(&self) {
        self.queue.send_now(Command::MediaServerDied);
    }

    /// Replay connections, mode, forced routes and every volume. Retries
    /// until the native side answers.
    pub(super) fn restore_media_server(&self) {
        if !self.is_system_ready() {
            self.queue
                .send(Command::MediaServerDied, MEDIA_SERVER_RETRY_DELAY);
            return;
        }
        if let Err(e) = self.routing.check_available() {
            warn!("media server not back yet: {}", e);
            self.queue
                .send(Command::MediaServerDied, MEDIA_SERVER_RETRY_DELAY);
            return;
        }
        info!("media server started, restoring state");

        {
            let devices = self.devices.lock();
            for (device, address, name) in devices.entries() {
                if let Err(e) = self.routing.set_device_connection_state(device, true, address, name) {
                    warn!(%device, "restore connection failed: {}", e);
                }
            }
        }

        let forced = {
            let modes = self.modes.lock();
            modes.restore(self.routing.as_ref());
            modes.forced_for_comm()
        };
        let system = if self.camera_forced() {
            ForceConfig::SystemEnforced
        } else {
            ForceConfig::None
        };
        for (usage, config) in [
            (ForceUsage::Communication, forced),
            (ForceUsage::Record, forced),
            (ForceUsage::System, system),
        ] {
            if let Err(e) = self.routing.set_force_use(usage, config) {
                warn!(?usage, "restore force use failed: {}", e);
            }
        }

        let mut ringer = self.ringer.lock();
        let mut streams = self.streams.lock();
        for stream in StreamKind::descending() {
            streams.reinit_stream(stream);
        }
        let mode = ringer.internal;
        self.set_ringer_mode_int(&mut ringer, &mut streams, mode, false);
    }
}
