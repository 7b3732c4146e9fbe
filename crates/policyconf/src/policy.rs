//! Policy seeds - initial tuning values for volume, ringer, safe volume and SCO.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stream range overrides and alias policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// UI steps for the voice call stream. 0 keeps the catalog default.
    #[serde(default)]
    pub voice_call_steps: u32,

    /// UI steps for the music stream. 0 keeps the catalog default.
    #[serde(default)]
    pub media_steps: u32,

    /// Notification volume follows ring volume on voice platforms.
    /// Default: true
    #[serde(default = "VolumeConfig::default_link_notification")]
    pub link_notification: bool,

    /// Window used when deciding whether a stream is "recently active".
    /// Default: 0
    #[serde(default)]
    pub stream_override_delay_ms: u64,
}

impl VolumeConfig {
    fn default_link_notification() -> bool {
        true
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            voice_call_steps: 0,
            media_steps: 0,
            link_notification: true,
            stream_override_delay_ms: 0,
        }
    }
}

/// How volume keys interact with silent and vibrate modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingerConfig {
    #[serde(default)]
    pub volume_down_to_enter_silent: bool,

    #[serde(default)]
    pub volume_up_to_exit_silent: bool,

    #[serde(default = "RingerConfig::default_dnd_when_silent")]
    pub do_not_disturb_when_silent: bool,

    /// Minimum time spent in vibrate before a second volume-down may reach silent.
    /// Default: 400
    #[serde(default = "RingerConfig::default_debounce")]
    pub vibrate_to_silent_debounce_ms: u64,
}

impl RingerConfig {
    fn default_dnd_when_silent() -> bool {
        true
    }

    fn default_debounce() -> u64 {
        400
    }
}

impl Default for RingerConfig {
    fn default() -> Self {
        Self {
            volume_down_to_enter_silent: false,
            volume_up_to_exit_silent: false,
            do_not_disturb_when_silent: true,
            vibrate_to_silent_debounce_ms: Self::default_debounce(),
        }
    }
}

/// Per-jurisdiction override of the safe volume profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// Headphone safe volume limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeVolumeConfig {
    /// Default: true
    #[serde(default = "SafeVolumeConfig::default_enabled")]
    pub enabled: bool,

    /// Cap in UI steps of the music stream.
    /// Default: 10
    #[serde(default = "SafeVolumeConfig::default_index")]
    pub index: u32,

    /// Test hook: never enforce.
    #[serde(default)]
    pub bypass: bool,

    /// Enforce even where the jurisdiction profile disables it.
    #[serde(default)]
    pub force: bool,

    /// Default: 60000 (one minute)
    #[serde(default = "SafeVolumeConfig::default_poll_period_ms")]
    pub poll_period_ms: u64,

    /// Cumulative loud listening allowed before the cap comes back.
    /// Default: 72000000 (20 hours)
    #[serde(default = "SafeVolumeConfig::default_unsafe_max_ms")]
    pub unsafe_max_ms: u64,

    /// Delay after system ready before configuring without a jurisdiction.
    /// Default: 30000
    #[serde(default = "SafeVolumeConfig::default_configure_timeout_ms")]
    pub configure_timeout_ms: u64,

    /// Keyed by jurisdiction code (mobile country code).
    #[serde(default)]
    pub jurisdictions: BTreeMap<String, JurisdictionOverride>,
}

impl SafeVolumeConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_index() -> u32 {
        10
    }

    fn default_poll_period_ms() -> u64 {
        60_000
    }

    fn default_unsafe_max_ms() -> u64 {
        20 * 3600 * 1000
    }

    fn default_configure_timeout_ms() -> u64 {
        30_000
    }

    /// Resolve `(enabled, index)` for a jurisdiction code.
    pub fn profile_for(&self, code: u32) -> (bool, u32) {
        let mut enabled = self.enabled;
        let mut index = self.index;
        if let Some(over) = self.jurisdictions.get(&code.to_string()) {
            if let Some(v) = over.enabled {
                enabled = v;
            }
            if let Some(v) = over.index {
                index = v;
            }
        }
        (enabled, index)
    }
}

impl Default for SafeVolumeConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            index: Self::default_index(),
            bypass: false,
            force: false,
            poll_period_ms: Self::default_poll_period_ms(),
            unsafe_max_ms: Self::default_unsafe_max_ms(),
            configure_timeout_ms: Self::default_configure_timeout_ms(),
            jurisdictions: BTreeMap::new(),
        }
    }
}

/// Bluetooth SCO negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoConfig {
    /// How long to wait for the headset profile to bind.
    /// Default: 3000
    #[serde(default = "ScoConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ScoConfig {
    fn default_connect_timeout_ms() -> u64 {
        3000
    }
}

impl Default for ScoConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Self::default_connect_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_for_falls_back_to_defaults() {
        let config = SafeVolumeConfig::default();
        assert_eq!(config.profile_for(310), (true, 10));
    }

    #[test]
    fn test_profile_for_applies_override() {
        let mut config = SafeVolumeConfig::default();
        config.jurisdictions.insert(
            "440".to_string(),
            JurisdictionOverride {
                enabled: Some(false),
                index: None,
            },
        );
        config.jurisdictions.insert(
            "208".to_string(),
            JurisdictionOverride {
                enabled: None,
                index: Some(8),
            },
        );
        assert_eq!(config.profile_for(440), (false, 10));
        assert_eq!(config.profile_for(208), (true, 8));
    }
}
