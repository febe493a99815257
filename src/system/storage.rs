//! Key/value settings persistence.
//! `FileStore` keeps a JSON object on disk, written through on every `set`.

use crate::error::StorageError;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;

    /// Applies every entry or none of them.
    fn set_many(&mut self, entries: &[(&str, String)]) -> Result<(), StorageError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_many(&[(key, value.to_string())])
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set_many(&mut self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.values.insert(key.to_string(), value.clone());
        }
        Ok(())
    }
}

pub struct FileStore {
    path: PathBuf,
    cached: BTreeMap<String, String>,
}

impl FileStore {
    /// Opens the settings file, starting empty if it does not exist or cannot be parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        info!("Opening settings file {}", path.display());

        let cached = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<BTreeMap<String, String>>(&data) {
                Ok(values) => {
                    info!("Loaded {} settings from {}", values.len(), path.display());
                    values
                }
                Err(e) => {
                    warn!("Settings file {} is not valid JSON ({}) - using defaults", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings file yet - using defaults");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, cached })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(values)?;
        // Write to a sibling file first so a crash never leaves a truncated store.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.cached.get(key).cloned()
    }

    // The cache only changes once the file write succeeded.
    fn set_many(&mut self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        let mut staged = self.cached.clone();
        for (key, value) in entries {
            staged.insert(key.to_string(), value.clone());
        }
        self.persist(&staged)?;
        self.cached = staged;
        debug!("Saved {} setting(s) to {}", entries.len(), self.path.display());
        Ok(())
    }
}
