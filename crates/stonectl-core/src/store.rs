//! Durable namespaced key/value store
//!
//! Every persisted value is a JSON document. `commit` applies a batch of
//! writes all-or-nothing, which is what migrations rely on to advance the
//! schema version together with the data they rewrite.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::StoreError;

pub const SPEC_STORE_PREFIX: &str = "spec_store/";
pub const INVENTORY_KEY: &str = "inventory";
pub const MIGRATION_CURRENT_KEY: &str = "migration_current";
pub const OSD_REMOVAL_QUEUE_KEY: &str = "osd_removal_queue";
pub const CLIENT_KEYRINGS_KEY: &str = "client_keyrings";
pub const NFS_MIGRATION_QUEUE_KEY: &str = "nfs_migration_queue";

/// Schema version written into every document
pub const DOCUMENT_VERSION: u32 = 1;

/// One write in a batch
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Set { key: String, value: Value },
    Rm { key: String },
}

/// Namespaced key/value persistence
pub trait KvStore: Send + Sync {
    /// # Errors
    /// Returns `StoreError::Io` when the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Keys starting with `prefix`, sorted
    ///
    /// # Errors
    /// Returns `StoreError::Io` when the backend cannot be read.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Apply every op or none of them
    ///
    /// # Errors
    /// Returns `StoreError::Io` when the batch could not be made durable.
    fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;

    /// # Errors
    /// See [`KvStore::commit`].
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.commit(vec![StoreOp::Set {
            key: key.to_string(),
            value,
        }])
    }

    /// # Errors
    /// See [`KvStore::commit`].
    fn rm(&self, key: &str) -> Result<(), StoreError> {
        self.commit(vec![StoreOp::Rm {
            key: key.to_string(),
        }])
    }
}

/// Versioned envelope for non-spec documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    pub version: u32,
    pub created: DateTime<Utc>,
    pub data: T,
}

/// Build the op writing `data` under `key`
///
/// # Errors
/// Returns `StoreError::Encode` if `data` cannot be serialized.
pub fn document_op<T: Serialize>(key: &str, data: &T) -> Result<StoreOp, StoreError> {
    let document = Document {
        version: DOCUMENT_VERSION,
        created: Utc::now(),
        data,
    };
    let value = serde_json::to_value(&document).map_err(|e| StoreError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(StoreOp::Set {
        key: key.to_string(),
        value,
    })
}

/// Read the payload of a document written by [`document_op`]
///
/// # Errors
/// Returns `StoreError::Corrupt` if the document does not decode.
pub fn load_document<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    let document: Document<T> = serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(document.data))
}

fn apply_ops(map: &mut BTreeMap<String, Value>, ops: Vec<StoreOp>) {
    for op in ops {
        match op {
            StoreOp::Set { key, value } => {
                map.insert(key, value);
            }
            StoreOp::Rm { key } => {
                map.remove(&key);
            }
        }
    }
}

fn prefixed(map: &BTreeMap<String, Value>, prefix: &str) -> Vec<String> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(prefixed(&data, prefix))
    }

    fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        apply_ops(&mut data, ops);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FileImage {
    version: u32,
    keys: BTreeMap<String, Value>,
}

/// Store persisted as a single JSON file
///
/// Each commit writes a complete new image to a temp file in the same
/// directory and renames it over the old one.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Open (or create on first commit) the store at `path`
    ///
    /// # Errors
    /// Returns `StoreError::Corrupt` if the file exists but is not a valid
    /// store image.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(bytes) => {
                let image: FileImage =
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                        key: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                if image.version > DOCUMENT_VERSION {
                    return Err(StoreError::Corrupt {
                        key: path.display().to_string(),
                        reason: format!("unsupported image version {}", image.version),
                    });
                }
                info!(path = %path.display(), keys = image.keys.len(), "opened state file");
                image.keys
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no state file yet, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_image(&self, keys: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let image = serde_json::json!({ "version": DOCUMENT_VERSION, "keys": keys });
        let bytes = serde_json::to_vec_pretty(&image).map_err(|e| StoreError::Encode {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(prefixed(&data, prefix))
    }

    fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = data.clone();
        let count = ops.len();
        apply_ops(&mut next, ops);
        self.write_image(&next)?;
        *data = next;
        debug!(path = %self.path.display(), ops = count, "committed batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_prefix_listing() {
        let store = MemoryStore::new();
        store.set("spec_store/mgr", json!(1)).unwrap();
        store.set("spec_store/mon", json!(2)).unwrap();
        store.set("spec_storex", json!(3)).unwrap();
        store.set("inventory", json!(4)).unwrap();

        assert_eq!(
            store.keys_with_prefix(SPEC_STORE_PREFIX).unwrap(),
            vec!["spec_store/mgr", "spec_store/mon"]
        );
    }

    #[test]
    fn test_document_envelope() {
        let store = MemoryStore::new();
        let op = document_op("osd_removal_queue", &vec![1u32, 2]).unwrap();
        store.commit(vec![op]).unwrap();

        let raw = store.get("osd_removal_queue").unwrap().unwrap();
        assert_eq!(raw["version"], json!(DOCUMENT_VERSION));
        assert!(raw["created"].is_string());

        let data: Vec<u32> = load_document(&store, "osd_removal_queue")
            .unwrap()
            .unwrap();
        assert_eq!(data, vec![1, 2]);
    }

    #[test]
    fn test_load_document_corrupt() {
        let store = MemoryStore::new();
        store.set("inventory", json!("not a document")).unwrap();
        let result: Result<Option<Vec<u32>>, _> = load_document(&store, "inventory");
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_file_store_persists_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStore::open(&path).unwrap();
        store
            .commit(vec![
                StoreOp::Set {
                    key: "migration_current".to_string(),
                    value: json!(4),
                },
                StoreOp::Set {
                    key: "spec_store/mgr".to_string(),
                    value: json!({"spec": {"service_type": "mgr"}}),
                },
            ])
            .unwrap();
        store.rm("spec_store/mgr").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("migration_current").unwrap(), Some(json!(4)));
        assert!(reopened.get("spec_store/mgr").unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
