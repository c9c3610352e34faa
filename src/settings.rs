//! User settings persistence
//!
//! A small keyed store for values that outlive a session. The pipeline
//! only persists one value itself (the chroma parameters), but the store
//! is shared with the embedding application, so it is injected through the
//! presenter context rather than reached through a global.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Settings key holding the persisted [`crate::ChromaParameters`].
pub const CHROMA_SETTINGS_KEY: &str = "chroma";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Keyed JSON value store.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
    fn remove(&mut self, key: &str);
}

/// In-memory store, used in tests and as a fallback when no settings file
/// is configured.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: HashMap<String, Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// JSON-file-backed store. Writes through on every mutation; a failed
/// write is logged and the in-memory state kept, so a read-only disk does
/// not take the pipeline down.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: HashMap<String, Value>,
}

impl JsonFileSettings {
    /// Load settings from `path`. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, values })
    }

    fn flush(&self) {
        let serialized = match serde_json::to_string_pretty(&self.values) {
            Ok(serialized) => serialized,
            Err(err) => {
                log::error!("failed to serialize settings: {err}");
                return;
            }
        };
        if let Err(err) = fs::write(&self.path, serialized) {
            log::error!("failed to write settings to {:?}: {err}", self.path);
        }
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        self.flush();
    }

    fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.flush();
        }
    }
}
