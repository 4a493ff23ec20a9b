//! Key-value persistence for the template catalog and install metadata.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// All keys in one pretty-printed JSON object on disk.
pub struct JsonFileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.path));
            }
        };
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents).with_context(|| format!("Corrupt storage file {:?}", self.path))
    }
}

impl KeyValueStorage for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directories for {:?}", self.path))?;
        }
        let json = serde_json::to_string_pretty(&Value::Object(map))?;
        fs::write(&self.path, json).with_context(|| format!("Failed to write {:?}", self.path))?;
        tracing::debug!("stored key {} in {:?}", key, self.path);
        Ok(())
    }
}

/// Process-local storage, used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_file_storage_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("storage.json");

        let storage = JsonFileStorage::new(&path);
        assert!(storage.get("templates").unwrap().is_none());
        storage.set("templates", json!([{"name": "a", "content": "b"}])).unwrap();
        storage.set("installedVersion", json!("0.1.0")).unwrap();

        let reopened = JsonFileStorage::new(&path);
        assert_eq!(reopened.get("installedVersion").unwrap(), Some(json!("0.1.0")));
        assert_eq!(reopened.get("templates").unwrap().unwrap()[0]["name"], "a");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("storage.json");
        fs::write(&path, "{not json").unwrap();

        let storage = JsonFileStorage::new(&path);
        assert!(storage.get("templates").is_err());
    }

    #[test]
    fn test_memory_storage_overwrites() {
        let storage = MemoryStorage::new();
        storage.set("k", json!(1)).unwrap();
        storage.set("k", json!(2)).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(json!(2)));
    }
}
