//! Audio device bit masks.
//!
//! A `Device` is either a single device bit or a mask of several. Output
//! devices use the low bits; input devices carry `Device::BIT_IN`.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Device(pub u32);

impl Device {
    pub const NONE: Device = Device(0);

    pub const EARPIECE: Device = Device(0x1);
    pub const SPEAKER: Device = Device(0x2);
    pub const WIRED_HEADSET: Device = Device(0x4);
    pub const WIRED_HEADPHONE: Device = Device(0x8);
    pub const BLUETOOTH_SCO: Device = Device(0x10);
    pub const BLUETOOTH_SCO_HEADSET: Device = Device(0x20);
    pub const BLUETOOTH_SCO_CARKIT: Device = Device(0x40);
    pub const BLUETOOTH_A2DP: Device = Device(0x80);
    pub const BLUETOOTH_A2DP_HEADPHONES: Device = Device(0x100);
    pub const BLUETOOTH_A2DP_SPEAKER: Device = Device(0x200);
    pub const HDMI: Device = Device(0x400);
    pub const ANLG_DOCK_HEADSET: Device = Device(0x800);
    pub const DGTL_DOCK_HEADSET: Device = Device(0x1000);
    pub const USB_ACCESSORY: Device = Device(0x2000);
    pub const USB_DEVICE: Device = Device(0x4000);
    pub const REMOTE_SUBMIX: Device = Device(0x8000);
    pub const TELEPHONY_TX: Device = Device(0x10000);
    pub const LINE: Device = Device(0x20000);
    pub const HDMI_ARC: Device = Device(0x40000);
    pub const SPDIF: Device = Device(0x80000);
    pub const FM: Device = Device(0x100000);
    pub const AUX_LINE: Device = Device(0x200000);
    pub const SPEAKER_SAFE: Device = Device(0x400000);

    /// Fallback entry every stream keeps.
    pub const DEFAULT: Device = Device(0x4000_0000);

    pub const BIT_IN: u32 = 0x8000_0000;
    pub const IN_BLUETOOTH_SCO_HEADSET: Device = Device(Self::BIT_IN | 0x8);
    pub const IN_WIRED_HEADSET: Device = Device(Self::BIT_IN | 0x10);

    pub const ALL_A2DP: Device = Device(0x80 | 0x100 | 0x200);
    pub const ALL_SCO: Device = Device(0x10 | 0x20 | 0x40);
    pub const ALL_USB: Device = Device(0x2000 | 0x4000);

    /// Every output bit plus `DEFAULT`.
    pub const OUT_ALL: Device = Device(0x7f_ffff | 0x4000_0000);

    /// Outputs that trigger "becoming noisy" when the last one goes away.
    pub const NOISY: Device = Device(
        Self::WIRED_HEADSET.0
            | Self::WIRED_HEADPHONE.0
            | Self::ALL_A2DP.0
            | Self::HDMI.0
            | Self::ANLG_DOCK_HEADSET.0
            | Self::DGTL_DOCK_HEADSET.0
            | Self::ALL_USB.0
            | Self::LINE.0,
    );

    /// Outputs whose volume is all or nothing for music.
    pub const FIXED_VOLUME_DEFAULT: Device = Device(
        Self::HDMI.0 | Self::DGTL_DOCK_HEADSET.0 | Self::HDMI_ARC.0 | Self::SPDIF.0 | Self::AUX_LINE.0,
    );

    /// Outputs subject to the safe media volume cap.
    pub const SAFE_VOLUME: Device = Device(Self::WIRED_HEADSET.0 | Self::WIRED_HEADPHONE.0);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_input(self) -> bool {
        self.0 & Self::BIT_IN != 0
    }

    pub fn intersects(self, other: Device) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: Device) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_single(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }

    /// Short name of a single output device, empty for `DEFAULT` and
    /// for anything unnamed.
    pub fn name(self) -> &'static str {
        match self {
            Self::EARPIECE => "earpiece",
            Self::SPEAKER => "speaker",
            Self::WIRED_HEADSET => "headset",
            Self::WIRED_HEADPHONE => "headphone",
            Self::BLUETOOTH_SCO => "bt_sco",
            Self::BLUETOOTH_SCO_HEADSET => "bt_sco_hs",
            Self::BLUETOOTH_SCO_CARKIT => "bt_sco_carkit",
            Self::BLUETOOTH_A2DP => "bt_a2dp",
            Self::BLUETOOTH_A2DP_HEADPHONES => "bt_a2dp_hp",
            Self::BLUETOOTH_A2DP_SPEAKER => "bt_a2dp_spk",
            Self::HDMI => "hdmi",
            Self::ANLG_DOCK_HEADSET => "analog_dock",
            Self::DGTL_DOCK_HEADSET => "digital_dock",
            Self::USB_ACCESSORY => "usb_accessory",
            Self::USB_DEVICE => "usb_device",
            Self::REMOTE_SUBMIX => "remote_submix",
            Self::TELEPHONY_TX => "telephony_tx",
            Self::LINE => "line",
            Self::HDMI_ARC => "hmdi_arc",
            Self::SPDIF => "spdif",
            Self::FM => "fm_transmitter",
            Self::AUX_LINE => "aux_line",
            Self::SPEAKER_SAFE => "speaker_safe",
            _ => "",
        }
    }

    /// Settings key for this device's index of a stream: `prefix` for
    /// `DEFAULT`, `prefix_<name>` otherwise.
    pub fn settings_key(self, prefix: &str) -> String {
        match self.name() {
            "" => prefix.to_string(),
            suffix => format!("{}_{}", prefix, suffix),
        }
    }

    /// Split a mask into its single-bit members, lowest first.
    pub fn split(self) -> impl Iterator<Item = Device> {
        (0..32)
            .map(|bit| Device(1 << bit))
            .filter(move |d| self.intersects(*d))
    }

    /// Collapse a multi-device routing mask to the one device whose index
    /// drives the stream.
    ///
    /// Priority is speaker, then HDMI-ARC, S/PDIF, aux line, and finally
    /// whatever A2DP device is in the mask. An empty result maps to
    /// `DEFAULT`.
    pub fn select_for_volume(self) -> Device {
        let selected = if self.is_single() || self.is_empty() {
            self
        } else if self.intersects(Self::SPEAKER) {
            Self::SPEAKER
        } else if self.intersects(Self::HDMI_ARC) {
            Self::HDMI_ARC
        } else if self.intersects(Self::SPDIF) {
            Self::SPDIF
        } else if self.intersects(Self::AUX_LINE) {
            Self::AUX_LINE
        } else {
            self & Self::ALL_A2DP
        };
        if selected.is_empty() {
            Self::DEFAULT
        } else {
            selected
        }
    }
}

impl BitOr for Device {
    type Output = Device;

    fn bitor(self, rhs: Device) -> Device {
        Device(self.0 | rhs.0)
    }
}

impl BitOrAssign for Device {
    fn bitor_assign(&mut self, rhs: Device) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Device {
    type Output = Device;

    fn bitand(self, rhs: Device) -> Device {
        Device(self.0 & rhs.0)
    }
}

impl Not for Device {
    type Output = Device;

    fn not(self) -> Device {
        Device(!self.0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            "" if *self == Device::DEFAULT => f.write_str("default"),
            "" => write!(f, "{:#x}", self.0),
            name => f.write_str(name),
        }
    }
}
