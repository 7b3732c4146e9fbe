//! Bluetooth SCO requests and forced communication routes.

use tracing::{debug, info, warn};

use super::AudioPolicyService;
use crate::boundary::{ForceConfig, ForceUsage, HeadsetAudioState, HeadsetDevice};
use crate::device::Device;
use crate::pipeline::Command;
use crate::sco::{ModeGate, ScoAudioState, ScoMode};
use crate::session::Session;

/// `XX:XX:XX:XX:XX:XX`, upper-case hex.
fn is_valid_bt_address(address: &str) -> bool {
    address.len() == 17
        && address.bytes().enumerate().all(|(i, b)| {
            if i % 3 == 2 {
                b == b':'
            } else {
                b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
            }
        })
}

impl AudioPolicyService {
    // === Requests ===

    /// Start SCO for `session`, sub-mode from the device preference.
    pub fn start_bluetooth_sco(&self, session: &Session) {
        self.start_sco(session, None);
    }

    /// Start SCO for `session` as a virtual voice call.
    pub fn start_bluetooth_sco_virtual_call(&self, session: &Session) {
        self.start_sco(session, Some(ScoMode::VirtualCall));
    }

    fn start_sco(&self, session: &Session, requested: Option<ScoMode>) {
        if !self.is_system_ready() {
            debug!(session = %session.id, "sco start before system ready");
            return;
        }
        let mut sco = self.sco.lock();
        let gate = {
            let modes = self.modes.lock();
            ModeGate {
                owner_pid: modes.owner_pid(),
                mode: modes.mode(),
            }
        };
        sco.inc(session.id, session.pid, requested, gate);
    }

    pub fn stop_bluetooth_sco(&self, session: &Session) {
        if !self.is_system_ready() {
            debug!(session = %session.id, "sco stop before system ready");
            return;
        }
        self.sco.lock().dec(session.id);
    }

    pub fn sco_audio_state(&self) -> ScoAudioState {
        self.sco.lock().audio_state()
    }

    // === Forced routes ===

    pub fn set_speakerphone_on(&self, on: bool) {
        let forced = {
            let mut modes = self.modes.lock();
            if on {
                if modes.forced_for_comm() == ForceConfig::BtSco {
                    self.queue.send_now(Command::SetForceUse {
                        usage: ForceUsage::Record,
                        config: ForceConfig::None,
                    });
                }
                modes.set_forced_for_comm(ForceConfig::Speaker);
            } else if modes.forced_for_comm() == ForceConfig::Speaker {
                modes.set_forced_for_comm(ForceConfig::None);
            }
            modes.forced_for_comm()
        };
        self.queue.send_now(Command::SetForceUse {
            usage: ForceUsage::Communication,
            config: forced,
        });
    }

    pub fn is_speakerphone_on(&self) -> bool {
        self.forced_for_communication() == ForceConfig::Speaker
    }

    pub fn set_bluetooth_sco_on(&self, on: bool) {
        self.set_bluetooth_sco_on_int(on);
    }

    pub fn is_bluetooth_sco_on(&self) -> bool {
        self.forced_for_communication() == ForceConfig::BtSco
    }

    pub(super) fn set_bluetooth_sco_on_int(&self, on: bool) {
        let forced = {
            let mut modes = self.modes.lock();
            if on {
                modes.set_forced_for_comm(ForceConfig::BtSco);
            } else if modes.forced_for_comm() == ForceConfig::BtSco {
                modes.set_forced_for_comm(ForceConfig::None);
            }
            modes.forced_for_comm()
        };
        for usage in [ForceUsage::Communication, ForceUsage::Record] {
            self.queue.send_now(Command::SetForceUse {
                usage,
                config: forced,
            });
        }
    }

    /// Drop every requester and any forced SCO route.
    pub(super) fn reset_bluetooth_sco(&self) {
        self.sco.lock().reset();
        self.set_bluetooth_sco_on_int(false);
    }

    // === Headset events ===

    /// A hands-free device connected or disconnected. Both the output and
    /// the capture endpoint are reported to routing.
    pub fn set_bt_sco_device_connection_state(&self, device: HeadsetDevice, connected: bool) {
        let address = if is_valid_bt_address(&device.address) {
            device.address.as_str()
        } else {
            warn!(address = %device.address, "invalid headset address");
            ""
        };
        let output = device.class.output_device();

        let handled = {
            let mut devices = self.devices.lock();
            devices.handle_connection(self.routing.as_ref(), connected, output, address, &device.name)
                && devices.handle_connection(
                    self.routing.as_ref(),
                    connected,
                    Device::IN_BLUETOOTH_SCO_HEADSET,
                    address,
                    &device.name,
                )
        };
        if !handled {
            return;
        }

        info!(address = %device.address, connected, "sco device");
        self.sco.lock().set_device(device, connected);
        if !connected {
            self.set_bluetooth_sco_on_int(false);
        }
    }

    pub fn on_headset_service_connected(&self) {
        self.sco.lock().on_headset_service_connected();
    }

    pub fn on_headset_service_disconnected(&self) {
        let device = self.sco.lock().on_headset_service_disconnected();
        if let Some(device) = device {
            self.set_bt_sco_device_connection_state(device, false);
        }
    }

    pub fn on_headset_audio_state_changed(&self, state: HeadsetAudioState) {
        self.sco.lock().on_audio_state_changed(state);
    }
}
