//! Key/value store shared between the tunnel core and the host application.
//!
//! Values are arbitrary JSON, cached in a [`DashMap`] and written through to
//! a single JSON document on disk after every mutation. Without a backing
//! path the store lives purely in memory.
//!
//! The store itself makes no attempt to serialise read-modify-write cycles
//! on a single key; callers that need that (the detection log) hold their own
//! lock around the get/set pair.

use crate::error::StoreError;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct SharedDefaults {
    path:   Option<PathBuf>,
    values: DashMap<String, Value>,
    /// Serialises writers of the backing file.
    flush:  Mutex<()>,
}

impl SharedDefaults {
    /// A store with no backing file.
    pub fn in_memory() -> Self {
        Self { path: None, values: DashMap::new(), flush: Mutex::new(()) }
    }

    /// Opens (or lazily creates) a store backed by the JSON document at `path`.
    ///
    /// A missing file is an empty store; an unreadable or malformed one is an
    /// error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = DashMap::new();

        match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => {
                let map: Map<String, Value> = serde_json::from_str(&text)?;
                for (k, v) in map {
                    values.insert(k, v);
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self { path: Some(path), values, flush: Mutex::new(()) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reads and decodes the value under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent and an error when the stored
    /// value does not decode as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.values.get(key) {
            Some(v) => Ok(Some(serde_json::from_value(v.value().clone())?)),
            None => Ok(None),
        }
    }

    /// Stores `value` under `key` and writes the store through to disk.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.to_string(), value);
        self.persist()
    }

    /// Removes `key`; a no-op if it is absent.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        if self.values.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Writes the whole store to the backing file via a temp file + rename so
    /// a concurrent reader never sees a half-written document.
    fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else { return Ok(()) };
        let _guard = self.flush.lock().unwrap_or_else(|e| e.into_inner());

        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let text = serde_json::to_string_pretty(&Value::Object(map))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
