//! Persisted component state
//!
//! Values are opaque strings keyed by quantity. They are restored once at startup
//! and persisted after every state-changing tick.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::errors::StoreError;

pub trait StateStore: Send + Sync {
    fn restore(&self, key: &str) -> Option<String>;

    fn persist(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Makes every persisted value durable.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-process store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
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
            values: Mutex::new(values.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl StateStore for MemoryStore {
    fn restore(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn persist(&self, key: &str, value: String) -> Result<(), StoreError> {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value);
        }
        Ok(())
    }
}

/// Store backed by a single JSON object file
///
/// The whole object is rewritten on every persist, through a temporary file and
/// a rename so a crash never leaves a truncated file behind.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store. A missing file starts empty; an unreadable one starts
    /// empty with a warning.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("Could not read state file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("tmp");
        let write_failed = |e: std::io::Error| StoreError::WriteFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        };
        fs::write(&tmp, json).map_err(write_failed)?;
        fs::rename(&tmp, &self.path).map_err(write_failed)
    }
}

impl StateStore for JsonFileStore {
    fn restore(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn persist(&self, key: &str, value: String) -> Result<(), StoreError> {
        let Ok(mut values) = self.values.lock() else {
            return Ok(());
        };
        if values.get(key) == Some(&value) {
            return Ok(());
        }
        values.insert(key.to_string(), value);
        self.write(&values)
    }

    fn flush(&self) -> Result<(), StoreError> {
        let Ok(values) = self.values.lock() else {
            return Ok(());
        };
        self.write(&values)
    }
}
