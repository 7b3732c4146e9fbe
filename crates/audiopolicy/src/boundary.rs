//! Collaborator contracts the policy core drives.
//!
//! The core never owns hardware, Bluetooth, or delivery. It talks to them
//! through these traits so the daemon can plug in real backends and tests
//! can plug in recorders.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::Device;
use crate::error::RoutingError;
use crate::mode::AudioMode;
use crate::ringer::{AdjustFlags, RingerMode};
use crate::sco::ScoConnectionState;
use crate::stream::{to_ui, StreamKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForceUsage {
    Communication,
    Media,
    Record,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForceConfig {
    None,
    Speaker,
    BtSco,
    SystemEnforced,
}

/// Native routing and volume backend. Calls return the native status;
/// callers log failures and carry on.
pub trait AudioRouting: Send + Sync {
    /// Ok once the native side is reachable.
    fn check_available(&self) -> Result<(), RoutingError>;

    /// Declare the index range (UI steps) of a stream.
    fn init_stream_volume(
        &self,
        stream: StreamKind,
        min_steps: i32,
        max_steps: i32,
    ) -> Result<(), RoutingError>;

    /// Apply a volume, in UI steps, for one device.
    fn set_stream_volume_index(
        &self,
        stream: StreamKind,
        index: i32,
        device: Device,
    ) -> Result<(), RoutingError>;

    fn set_device_connection_state(
        &self,
        device: Device,
        available: bool,
        address: &str,
        name: &str,
    ) -> Result<(), RoutingError>;

    /// Mask of output devices the stream is currently routed to.
    fn devices_for_stream(&self, stream: StreamKind) -> Device;

    fn set_force_use(&self, usage: ForceUsage, config: ForceConfig) -> Result<(), RoutingError>;

    fn set_phone_state(&self, mode: AudioMode) -> Result<(), RoutingError>;

    /// Whether the stream played within the last `within`.
    fn is_stream_active(&self, stream: StreamKind, within: Duration) -> bool;
}

/// Audio link state reported by the headset for its current device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadsetAudioState {
    Disconnected,
    Connecting,
    Connected,
}

/// Bluetooth class of a hands-free device, decides its output device bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoDeviceClass {
    Headset,
    Carkit,
    Generic,
}

impl ScoDeviceClass {
    pub fn output_device(self) -> Device {
        match self {
            ScoDeviceClass::Headset => Device::BLUETOOTH_SCO_HEADSET,
            ScoDeviceClass::Carkit => Device::BLUETOOTH_SCO_CARKIT,
            ScoDeviceClass::Generic => Device::BLUETOOTH_SCO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadsetDevice {
    pub address: String,
    pub name: String,
    pub class: ScoDeviceClass,
}

/// Bluetooth hands-free profile proxy. Binding completes asynchronously:
/// the transport calls `on_headset_service_connected` when it does.
pub trait HeadsetProxy: Send + Sync {
    /// Start binding. False when binding cannot even begin.
    fn bind(&self) -> bool;

    fn connected_devices(&self) -> Vec<HeadsetDevice>;

    fn audio_state(&self, device: &HeadsetDevice) -> HeadsetAudioState;

    fn connect_audio(&self) -> bool;
    fn disconnect_audio(&self) -> bool;
    fn start_virtual_voice_call(&self, device: &HeadsetDevice) -> bool;
    fn stop_virtual_voice_call(&self, device: &HeadsetDevice) -> bool;
    fn start_voice_recognition(&self, device: &HeadsetDevice) -> bool;
    fn stop_voice_recognition(&self, device: &HeadsetDevice) -> bool;
}

/// Events fanned out to interested parties. Delivery is best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PolicyEvent {
    /// Indices are internal units (tenths of a UI step).
    VolumeChanged {
        stream: StreamKind,
        device: Device,
        old_index: i32,
        new_index: i32,
    },
    StreamMuteChanged {
        stream: StreamKind,
        muted: bool,
    },
    RingerModeChanged {
        mode: RingerMode,
        internal: bool,
    },
    ScoStateChanged {
        state: ScoConnectionState,
        previous: ScoConnectionState,
    },
    DeviceConnectionChanged {
        device: Device,
        connected: bool,
        address: String,
        name: String,
    },
    BecomingNoisy,
}

impl PolicyEvent {
    /// `(old, new)` in UI steps for volume changes.
    pub fn ui_indices(&self) -> Option<(i32, i32)> {
        match self {
            PolicyEvent::VolumeChanged {
                old_index,
                new_index,
                ..
            } => Some((to_ui(*old_index), to_ui(*new_index))),
            _ => None,
        }
    }
}

pub trait BroadcastSink: Send + Sync {
    fn publish(&self, event: PolicyEvent);
}

/// Volume UI surface.
pub trait VolumeController: Send + Sync {
    fn volume_changed(&self, stream: StreamKind, flags: AdjustFlags);
    fn display_safe_volume_warning(&self, flags: AdjustFlags);
}

pub trait CallStateQuery: Send + Sync {
    fn is_in_call(&self) -> bool;
}

/// Routing backend with no hardware behind it: logs every call and
/// reports everything on the speaker.
#[derive(Debug, Default)]
pub struct LoggingRouting;

impl AudioRouting for LoggingRouting {
    fn check_available(&self) -> Result<(), RoutingError> {
        Ok(())
    }

    fn init_stream_volume(
        &self,
        stream: StreamKind,
        min_steps: i32,
        max_steps: i32,
    ) -> Result<(), RoutingError> {
        debug!(%stream, min_steps, max_steps, "init stream volume");
        Ok(())
    }

    fn set_stream_volume_index(
        &self,
        stream: StreamKind,
        index: i32,
        device: Device,
    ) -> Result<(), RoutingError> {
        debug!(%stream, index, %device, "set stream volume");
        Ok(())
    }

    fn set_device_connection_state(
        &self,
        device: Device,
        available: bool,
        address: &str,
        name: &str,
    ) -> Result<(), RoutingError> {
        info!(%device, available, address, name, "device connection");
        Ok(())
    }

    fn devices_for_stream(&self, _stream: StreamKind) -> Device {
        Device::SPEAKER
    }

    fn set_force_use(&self, usage: ForceUsage, config: ForceConfig) -> Result<(), RoutingError> {
        debug!(?usage, ?config, "force use");
        Ok(())
    }

    fn set_phone_state(&self, mode: AudioMode) -> Result<(), RoutingError> {
        info!(?mode, "phone state");
        Ok(())
    }

    fn is_stream_active(&self, _stream: StreamKind, _within: Duration) -> bool {
        false
    }
}

/// Headset proxy for platforms without Bluetooth: binding never starts.
#[derive(Debug, Default)]
pub struct NoHeadset;

impl HeadsetProxy for NoHeadset {
    fn bind(&self) -> bool {
        false
    }

    fn connected_devices(&self) -> Vec<HeadsetDevice> {
        Vec::new()
    }

    fn audio_state(&self, _device: &HeadsetDevice) -> HeadsetAudioState {
        HeadsetAudioState::Disconnected
    }

    fn connect_audio(&self) -> bool {
        false
    }

    fn disconnect_audio(&self) -> bool {
        false
    }

    fn start_virtual_voice_call(&self, _device: &HeadsetDevice) -> bool {
        false
    }

    fn stop_virtual_voice_call(&self, _device: &HeadsetDevice) -> bool {
        false
    }

    fn start_voice_recognition(&self, _device: &HeadsetDevice) -> bool {
        false
    }

    fn stop_voice_recognition(&self, _device: &HeadsetDevice) -> bool {
        false
    }
}

/// Sink that writes every event to the log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl BroadcastSink for TracingSink {
    fn publish(&self, event: PolicyEvent) {
        info!(?event, "broadcast");
    }
}

/// Does nothing.
#[derive(Debug, Default)]
pub struct NoOpController;

impl VolumeController for NoOpController {
    fn volume_changed(&self, _stream: StreamKind, _flags: AdjustFlags) {}
    fn display_safe_volume_warning(&self, _flags: AdjustFlags) {}
}

#[derive(Debug, Default)]
pub struct NeverInCall;

impl CallStateQuery for NeverInCall {
    fn is_in_call(&self) -> bool {
        false
    }
}
