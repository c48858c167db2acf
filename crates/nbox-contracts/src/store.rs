use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{NboxError, NboxResult};
use crate::history::{HistoryKind, HistoryLogs};

/// String key/value persistence for the history logs.
pub trait KeyValueStore: Send {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// All keys live in one JSON object file.
///
/// Reads refresh from disk. Writes merge only the keys this instance changed, so
/// two processes writing different keys do not clobber each other.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    payload: Map<String, Value>,
    dirty_keys: Vec<String>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: Map::new(),
            dirty_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn refresh(&mut self) -> anyhow::Result<()> {
        self.payload = read_json_object(&self.path)?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if self.dirty_keys.is_empty() {
            return Ok(());
        }
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        for key in &self.dirty_keys {
            if let Some(value) = self.payload.get(key) {
                on_disk.insert(key.clone(), value.clone());
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = on_disk;
        self.dirty_keys.clear();
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        self.refresh()?;
        Ok(self
            .payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        // A corrupt file is replaced key by key rather than blocking every write.
        self.payload = read_json_object(&self.path).unwrap_or_default();
        self.payload
            .insert(key.to_string(), Value::String(value.to_string()));
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }
}

fn read_json_object(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => return Err(err.into()),
    };
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    let parsed: Value = serde_json::from_str(&raw)?;
    match parsed {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} does not hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Serializes the history logs through a [`KeyValueStore`].
pub struct HistoryPersistence {
    store: Box<dyn KeyValueStore>,
}

impl std::fmt::Debug for HistoryPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryPersistence").finish_non_exhaustive()
    }
}

impl HistoryPersistence {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    /// Loads every log. A malformed or unreadable key yields an empty log for that key only.
    pub fn load_all(&mut self) -> HistoryLogs {
        let mut logs = HistoryLogs::default();
        for kind in HistoryKind::ALL {
            let loaded = match kind {
                HistoryKind::Exterior => self.load_key(kind).map(|items| logs.exterior = items),
                HistoryKind::Interior => self.load_key(kind).map(|items| logs.interior = items),
                HistoryKind::Floorplan => self.load_key(kind).map(|items| logs.floorplan = items),
                HistoryKind::Edit => self.load_key(kind).map(|items| logs.edit = items),
            };
            if let Err(err) = loaded {
                tracing::warn!(key = kind.storage_key(), error = %err, "discarding stored history");
            }
        }
        logs
    }

    pub fn load_key<T: DeserializeOwned>(&mut self, kind: HistoryKind) -> NboxResult<Vec<T>> {
        let key = kind.storage_key();
        let raw = self
            .store
            .get(key)
            .map_err(|err| NboxError::MalformedPersistedData {
                key: key.to_string(),
                reason: format!("{err:#}"),
            })?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|err| NboxError::MalformedPersistedData {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }

    /// Writes one log back. Failures are logged and otherwise ignored.
    pub fn save(&mut self, kind: HistoryKind, logs: &HistoryLogs) {
        let result = match kind.render_type() {
            Some(render_type) => self.save_items(kind, logs.render_log(render_type)),
            None => self.save_items(kind, &logs.edit),
        };
        match result {
            Ok(()) => tracing::debug!(key = kind.storage_key(), "history saved"),
            Err(err) => {
                tracing::warn!(key = kind.storage_key(), error = %format!("{err:#}"), "failed to persist history")
            }
        }
    }

    fn save_items<T: Serialize>(&mut self, kind: HistoryKind, items: &[T]) -> anyhow::Result<()> {
        let raw = serde_json::to_string(items)?;
        self.store.set(kind.storage_key(), &raw)
    }
}
