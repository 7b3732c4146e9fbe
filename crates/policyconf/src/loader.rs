//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, PlatformKind, PolicyConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/audiopolicy/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("audiopolicy/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("audiopolicy.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Turn a raw table into a typed config, filling gaps with defaults.
pub fn parse_table(table: toml::Table, path: &Path) -> Result<PolicyConfig, ConfigError> {
    let mut config: PolicyConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

    if let Some(raw) = config.paths.state_dir.to_str().map(str::to_owned) {
        config.paths.state_dir = expand_path(&raw);
    }

    Ok(config)
}

/// Merge `overlay` into `base` key by key; nested tables merge recursively.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn env_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut PolicyConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("AUDIOPOLICY_STATE_DIR") {
        config.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("AUDIOPOLICY_STATE_DIR".to_string());
    }

    if let Ok(v) = env::var("AUDIOPOLICY_PLATFORM") {
        if let Some(kind) = PlatformKind::parse(&v) {
            config.platform.kind = kind;
            sources.env_overrides.push("AUDIOPOLICY_PLATFORM".to_string());
        }
    }
    if let Some(v) = env::var("AUDIOPOLICY_HAS_VIBRATOR").ok().and_then(|v| env_bool(&v)) {
        config.platform.has_vibrator = v;
        sources.env_overrides.push("AUDIOPOLICY_HAS_VIBRATOR".to_string());
    }
    if let Some(v) = env::var("AUDIOPOLICY_FIXED_VOLUME").ok().and_then(|v| env_bool(&v)) {
        config.platform.use_fixed_volume = v;
        sources.env_overrides.push("AUDIOPOLICY_FIXED_VOLUME".to_string());
    }

    if let Some(v) = env::var("AUDIOPOLICY_SAFE_VOLUME_BYPASS").ok().and_then(|v| env_bool(&v)) {
        config.safe_volume.bypass = v;
        sources.env_overrides.push("AUDIOPOLICY_SAFE_VOLUME_BYPASS".to_string());
    }
    if let Some(v) = env::var("AUDIOPOLICY_SAFE_VOLUME_FORCE").ok().and_then(|v| env_bool(&v)) {
        config.safe_volume.force = v;
        sources.env_overrides.push("AUDIOPOLICY_SAFE_VOLUME_FORCE".to_string());
    }

    if let Ok(v) = env::var("AUDIOPOLICY_VOICE_CALL_STEPS") {
        if let Ok(steps) = v.parse() {
            config.volume.voice_call_steps = steps;
            sources.env_overrides.push("AUDIOPOLICY_VOICE_CALL_STEPS".to_string());
        }
    }
    if let Ok(v) = env::var("AUDIOPOLICY_MEDIA_STEPS") {
        if let Ok(steps) = v.parse() {
            config.volume.media_steps = steps;
            sources.env_overrides.push("AUDIOPOLICY_MEDIA_STEPS".to_string());
        }
    }

    if let Ok(v) = env::var("AUDIOPOLICY_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("AUDIOPOLICY_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> PolicyConfig {
        let table: toml::Table = contents.parse().unwrap();
        parse_table(table, Path::new("test.toml")).unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[paths]
state_dir = "/custom/state"
"#,
        );
        assert_eq!(config.paths.state_dir, PathBuf::from("/custom/state"));
        // Other values should be defaults
        assert_eq!(config.safe_volume.index, 10);
        assert!(config.platform.has_vibrator);
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[platform]
kind = "television"
has_vibrator = false
use_fixed_volume = true
camera_sound_forced = true

[volume]
voice_call_steps = 7
media_steps = 25
link_notification = false

[ringer]
volume_down_to_enter_silent = true
volume_up_to_exit_silent = true
vibrate_to_silent_debounce_ms = 250

[safe_volume]
enabled = false
index = 8
poll_period_ms = 1000

[safe_volume.jurisdictions."208"]
enabled = true

[sco]
connect_timeout_ms = 500
"#,
        );

        assert_eq!(config.platform.kind, PlatformKind::Television);
        assert!(!config.platform.has_vibrator);
        assert!(config.platform.use_fixed_volume);
        assert!(config.platform.camera_sound_forced);
        assert_eq!(config.volume.voice_call_steps, 7);
        assert_eq!(config.volume.media_steps, 25);
        assert!(!config.volume.link_notification);
        assert!(config.ringer.volume_down_to_enter_silent);
        assert_eq!(config.ringer.vibrate_to_silent_debounce_ms, 250);
        assert_eq!(config.safe_volume.profile_for(310), (false, 8));
        assert_eq!(config.safe_volume.profile_for(208), (true, 8));
        assert_eq!(config.safe_volume.poll_period_ms, 1000);
        assert_eq!(config.sco.connect_timeout_ms, 500);
    }

    #[test]
    fn test_parse_rejects_wrong_type() {
        let table: toml::Table = "[safe_volume]\nindex = \"loud\"".parse().unwrap();
        let err = parse_table(table, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_merge_tables_nested() {
        let mut base: toml::Table = r#"
[platform]
kind = "voice"
has_vibrator = true

[sco]
connect_timeout_ms = 3000
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = r#"
[platform]
has_vibrator = false
"#
        .parse()
        .unwrap();

        merge_tables(&mut base, overlay);
        let config = parse_table(base, Path::new("merged")).unwrap();

        // Overlay wins per key, untouched keys survive
        assert_eq!(config.platform.kind, PlatformKind::Voice);
        assert!(!config.platform.has_vibrator);
        assert_eq!(config.sco.connect_timeout_ms, 3000);
    }
}
