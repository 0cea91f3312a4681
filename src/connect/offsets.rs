//! File-backed source offsets of a standalone worker.
//!
//! Offsets are keyed by `(connector, source partition)`. On disk every entry
//! is the key `[connector, partition]` and the offset, each encoded through
//! the worker's internal converters, so the file reads the same way a
//! standalone worker's offset file does with JSON internal converters.
//!
//! The store is loaded once at worker start and written back by the flush
//! task and once more at stop. Writes only happen when something changed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::converter::Converter;
use crate::error::{Error, Result};

type OffsetKey = (String, String);

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: String,
}

pub struct FileOffsetStore {
    path: PathBuf,
    key_converter: Box<dyn Converter>,
    value_converter: Box<dyn Converter>,
    /// Partitions are kept as canonical JSON text so they can be map keys.
    offsets: Mutex<BTreeMap<OffsetKey, Value>>,
    dirty: AtomicBool,
}

impl FileOffsetStore {
    /// Open the store at `path`. A missing or empty file is an empty store.
    pub fn open(
        path: impl Into<PathBuf>,
        key_converter: Box<dyn Converter>,
        value_converter: Box<dyn Converter>,
    ) -> Result<Self> {
        let path = path.into();
        let mut offsets = BTreeMap::new();

        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if !contents.iter().all(u8::is_ascii_whitespace) {
            let entries: Vec<StoredEntry> = serde_json::from_slice(&contents)?;
            for entry in entries {
                let key = key_converter.to_value(entry.key.as_bytes())?;
                let (connector, partition) = match key {
                    Value::Array(mut parts) if parts.len() == 2 => {
                        let partition = parts.pop().unwrap_or(Value::Null);
                        match parts.pop() {
                            Some(Value::String(connector)) => (connector, partition),
                            _ => return Err(invalid_key(&entry.key)),
                        }
                    }
                    _ => return Err(invalid_key(&entry.key)),
                };
                let offset = value_converter.to_value(entry.value.as_bytes())?;
                offsets.insert((connector, partition.to_string()), offset);
            }
        }

        debug!(path = %path.display(), entries = offsets.len(), "Loaded offset store");

        Ok(Self {
            path,
            key_converter,
            value_converter,
            offsets: Mutex::new(offsets),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, connector: &str, partition: &Value) -> Option<Value> {
        self.lock()
            .get(&(connector.to_string(), partition.to_string()))
            .cloned()
    }

    pub fn put(&self, connector: &str, partition: &Value, offset: Value) {
        self.lock()
            .insert((connector.to_string(), partition.to_string()), offset);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Every `(partition, offset)` stored for `connector`.
    pub fn offsets(&self, connector: &str) -> Vec<(Value, Value)> {
        self.lock()
            .iter()
            .filter(|((name, _), _)| name == connector)
            .filter_map(|((_, partition), offset)| {
                serde_json::from_str(partition)
                    .ok()
                    .map(|partition| (partition, offset.clone()))
            })
            .collect()
    }

    /// Drop every offset of `connector`. Returns how many were removed.
    pub fn remove_connector(&self, connector: &str) -> usize {
        let mut offsets = self.lock();
        let before = offsets.len();
        offsets.retain(|(name, _), _| name != connector);
        let removed = before - offsets.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Write the store if it changed since the last flush.
    ///
    /// Returns true if the file was written.
    pub async fn flush(&self) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        let body = match self.encode() {
            Ok(body) => body,
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::write(&self.path, body).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Flushed offsets");
        Ok(true)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let entries = self
            .lock()
            .iter()
            .map(|((connector, partition), offset)| -> Result<StoredEntry> {
                let partition: Value = serde_json::from_str(partition)?;
                let key = self.key_converter.from_value(&json!([connector, partition]))?;
                let value = self.value_converter.from_value(offset)?;
                Ok(StoredEntry {
                    key: utf8(key)?,
                    value: utf8(value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(serde_json::to_vec_pretty(&entries)?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<OffsetKey, Value>> {
        self.offsets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| Error::Conversion("internal converter produced non UTF-8 output".to_string()))
}

fn invalid_key(key: &str) -> Error {
    Error::Conversion(format!(
        "offset key {} is not a [connector, partition] pair",
        key
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::converter::ConverterKind;

    fn open(path: &Path) -> FileOffsetStore {
        FileOffsetStore::open(
            path,
            ConverterKind::Json.build(true),
            ConverterKind::Json.build(true),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_file_is_empty_store() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = open(file.path());
        assert!(store.is_empty());
        assert_eq!(store.get("sink", &json!({"file": "a"})), None);
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let partition = json!({"file": "input.txt"});

        let store = open(file.path());
        store.put("source", &partition, json!({"position": 42}));
        store.put("other", &json!({"file": "b"}), json!({"position": 1}));
        assert!(store.flush().await.unwrap());
        assert!(!store.flush().await.unwrap());

        let raw: Value = serde_json::from_slice(&std::fs::read(file.path()).unwrap()).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 2);

        let reloaded = open(file.path());
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get("source", &partition),
            Some(json!({"position": 42}))
        );
        assert_eq!(
            reloaded.offsets("source"),
            vec![(partition, json!({"position": 42}))]
        );
    }

    #[tokio::test]
    async fn test_remove_connector_marks_dirty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = open(file.path());
        store.put("source", &json!(0), json!(10));
        store.flush().await.unwrap();

        assert_eq!(store.remove_connector("missing"), 0);
        assert!(!store.flush().await.unwrap());

        assert_eq!(store.remove_connector("source"), 1);
        assert!(store.flush().await.unwrap());
        assert!(open(file.path()).is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not json").unwrap();
        assert!(
            FileOffsetStore::open(
                file.path(),
                ConverterKind::Json.build(true),
                ConverterKind::Json.build(true),
            )
            .is_err()
        );
    }
}
