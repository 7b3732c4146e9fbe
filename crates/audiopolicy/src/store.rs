//! Settings persistence.
//!
//! Reads happen synchronously at startup; writes are issued by the
//! pipeline consumer after the in-memory change has been applied.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;

pub const MODE_RINGER_KEY: &str = "mode_ringer";
pub const RINGER_AFFECTED_KEY: &str = "mode_ringer_streams_affected";
pub const MUTE_AFFECTED_KEY: &str = "mute_streams_affected";
pub const LINK_NOTIFICATION_KEY: &str = "volume_link_notification";

pub trait SettingsStore: Send + Sync {
    fn get_int(&self, key: &str) -> Option<i32>;
    fn put_int(&self, key: &str, value: i32) -> Result<(), StoreError>;

    fn get_int_or(&self, key: &str, default: i32) -> i32 {
        self.get_int(key).unwrap_or(default)
    }
}

/// In-memory store, used by tests and as a fallback when the state
/// directory is unusable.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, i32>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, i32)>,
        K: Into<String>,
    {
        Self {
            values: Mutex::new(values.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, i32> {
        self.values.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl SettingsStore for MemorySettings {
    fn get_int(&self, key: &str) -> Option<i32> {
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .copied()
    }

    fn put_int(&self, key: &str, value: i32) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    values: BTreeMap<String, i32>,
}

/// JSON file store at `<state_dir>/settings.json`.
///
/// The whole map is rewritten on every put via a temp file and rename.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    doc: Mutex<SettingsDocument>,
}

impl FileSettings {
    pub const FILE_NAME: &'static str = "settings.json";

    /// Open the store in `state_dir`, creating the directory if needed.
    /// A missing file starts empty; a corrupt one is an error.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(state_dir).map_err(|e| StoreError::Write {
            path: state_dir.to_path_buf(),
            source: e,
        })?;
        let path = state_dir.join(Self::FILE_NAME);

        let doc = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| StoreError::Decode {
                path: path.clone(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SettingsDocument::default(),
            Err(e) => {
                return Err(StoreError::Read {
                    path: path.clone(),
                    source: e,
                })
            }
        };
        debug!(path = %path.display(), entries = doc.values.len(), "opened settings store");

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.doc.lock().unwrap_or_else(|p| p.into_inner()).updated_at
    }

    fn flush(&self, doc: &SettingsDocument) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| StoreError::Write {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::Write {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl SettingsStore for FileSettings {
    fn get_int(&self, key: &str) -> Option<i32> {
        self.doc
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values
            .get(key)
            .copied()
    }

    fn put_int(&self, key: &str, value: i32) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().unwrap_or_else(|p| p.into_inner());
        if doc.values.get(key) == Some(&value) {
            return Ok(());
        }
        doc.values.insert(key.to_string(), value);
        doc.updated_at = Some(Utc::now());
        if let Err(e) = self.flush(&doc) {
            warn!("settings write failed: {}", e);
            return Err(e);
        }
        Ok(())
    }
}
