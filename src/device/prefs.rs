//! Opaque string preferences used to persist the developer account.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::util::fs::write_atomic;

/// Small key/value persistence supplied by the host platform.
///
/// Values are stored as given; this is not a secret store.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;
    fn remove(&self, key: &str) -> Result<(), AuthError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceFile {
    #[serde(default)]
    preferences: BTreeMap<String, String>,
}

/// TOML-backed preference file, rewritten atomically on every change.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<PreferenceFile, AuthError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PreferenceFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, file: &PreferenceFile) -> Result<(), AuthError> {
        let raw = toml::to_string(file)?;
        write_atomic(&self.path, raw.as_bytes())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<(), AuthError> {
        let _guard = self.lock.lock().map_err(|_| AuthError::Io("preference lock poisoned".to_string()))?;
        let mut file = self.read()?;
        if apply(&mut file.preferences) {
            self.write(&file)?;
        }
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.read()?.preferences.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.update(|prefs| {
            prefs.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.update(|prefs| prefs.remove(key).is_some())
    }
}
