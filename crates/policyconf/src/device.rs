//! Device facts - things the hardware or build decides, fixed for the process lifetime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Broad class of the platform, decides the stream alias table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// Voice-capable handset.
    #[default]
    Voice,
    /// Television or set-top box: every stream follows music.
    Television,
    /// Anything else (tablets without telephony, embedded).
    Default,
}

impl PlatformKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "voice" | "phone" => Some(PlatformKind::Voice),
            "television" | "tv" => Some(PlatformKind::Television),
            "default" => Some(PlatformKind::Default),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Voice => "voice",
            PlatformKind::Television => "television",
            PlatformKind::Default => "default",
        }
    }
}

/// Hardware capabilities and build-time policy switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform class.
    /// Default: voice
    #[serde(default)]
    pub kind: PlatformKind,

    /// Whether a vibrator motor is present.
    /// Default: true
    #[serde(default = "PlatformConfig::default_true")]
    pub has_vibrator: bool,

    /// Every stream pinned at max, volume and ringer changes ignored.
    /// Default: false
    #[serde(default)]
    pub use_fixed_volume: bool,

    /// Camera shutter sound cannot be silenced (regulatory).
    /// Default: false
    #[serde(default)]
    pub camera_sound_forced: bool,

    /// Volume keys drive the ring stream when nothing is playing.
    /// Default: true
    #[serde(default = "PlatformConfig::default_true")]
    pub volume_keys_control_ring_stream: bool,
}

impl PlatformConfig {
    fn default_true() -> bool {
        true
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            kind: PlatformKind::default(),
            has_vibrator: true,
            use_fixed_volume: false,
            camera_sound_forced: false,
            volume_keys_control_ring_stream: true,
        }
    }
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the persisted settings store.
    /// Default: ~/.local/share/audiopolicy
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/audiopolicy"))
            .unwrap_or_else(|| PathBuf::from(".local/share/audiopolicy"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive handed to the tracing subscriber.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
