//! Configuration loading for the audio policy daemon.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Device facts** (`device`): things the hardware or the build decides -
//!   platform class, vibrator presence, fixed volume, paths, logging.
//!
//! - **Policy seeds** (`policy`): tuning values that seed the policy core -
//!   stream ranges, ringer behaviour, safe volume limits, SCO timeouts.
//!   After startup, the running service owns its state.
//!
//! # Usage
//!
//! ```rust,no_run
//! use policyconf::PolicyConfig;
//!
//! let config = PolicyConfig::load().expect("Failed to load config");
//! println!("platform: {}", config.platform.kind.as_str());
//! println!("safe index: {}", config.safe_volume.index);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/audiopolicy/config.toml` (system)
//! 2. `~/.config/audiopolicy/config.toml` (user)
//! 3. `./audiopolicy.toml` (local override) or an explicit path
//! 4. Environment variables (`AUDIOPOLICY_*`)
//!
//! # Example Config
//!
//! ```toml
//! [platform]
//! kind = "voice"
//! has_vibrator = true
//!
//! [paths]
//! state_dir = "~/.local/share/audiopolicy"
//!
//! [telemetry]
//! log_level = "info"
//!
//! [ringer]
//! volume_down_to_enter_silent = true
//!
//! [safe_volume]
//! index = 10
//!
//! [safe_volume.jurisdictions."440"]
//! enabled = false
//! ```

pub mod device;
pub mod loader;
pub mod policy;

pub use device::{PathsConfig, PlatformConfig, PlatformKind, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use policy::{JurisdictionOverride, RingerConfig, SafeVolumeConfig, ScoConfig, VolumeConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to render config: {message}")]
    Render { message: String },
}

/// Complete audio policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub volume: VolumeConfig,

    #[serde(default)]
    pub ringer: RingerConfig,

    #[serde(default)]
    pub safe_volume: SafeVolumeConfig,

    #[serde(default)]
    pub sco: ScoConfig,
}

impl PolicyConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local override file.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            // Reject a broken file here so the error names it
            loader::parse_table(table.clone(), &path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::parse_table(merged, std::path::Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self).map_err(|e| ConfigError::Render {
            message: e.to_string(),
        })?;
        Ok(format!("# audiopolicy configuration\n\n{}", body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PolicyConfig::default();
        assert_eq!(config.platform.kind, PlatformKind::Voice);
        assert_eq!(config.safe_volume.index, 10);
        assert_eq!(config.safe_volume.poll_period_ms, 60_000);
        assert_eq!(config.sco.connect_timeout_ms, 3000);
        assert_eq!(config.ringer.vibrate_to_silent_debounce_ms, 400);
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = PolicyConfig::default();
        config.platform.kind = PlatformKind::Television;
        config.safe_volume.jurisdictions.insert(
            "440".to_string(),
            JurisdictionOverride {
                enabled: Some(false),
                index: None,
            },
        );
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[platform]"));
        assert!(rendered.contains("kind = \"television\""));

        let reparsed: PolicyConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.platform.kind, PlatformKind::Television);
        assert_eq!(
            reparsed.safe_volume.profile_for(440),
            (false, config.safe_volume.index)
        );
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[platform]
kind = "default"
has_vibrator = false

[sco]
connect_timeout_ms = 1500
"#
        )
        .unwrap();

        let config = PolicyConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.platform.kind, PlatformKind::Default);
        assert!(!config.platform.has_vibrator);
        assert_eq!(config.sco.connect_timeout_ms, 1500);
    }

    #[test]
    fn test_load_reports_broken_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[platform]\nkind = \"toaster\"").unwrap();

        let err = PolicyConfig::load_from(Some(file.path())).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
