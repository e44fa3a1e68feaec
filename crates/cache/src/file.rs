//! JSON file backed state store
//!
//! Values are held in memory and written through to a single JSON object
//! mapping keys to base64 blobs. Writes go to a sibling temp file first and
//! are renamed into place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{CacheError, Result, StateStore};

pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl FileStore {
    /// Open a store, loading any existing contents from `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => decode_entries(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &HashMap<String, Vec<u8>>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let encoded: HashMap<&str, String> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), BASE64.encode(v)))
            .collect();
        let json = serde_json::to_vec_pretty(&encoded)?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!("Failed to move state file into place: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

fn decode_entries(raw: &[u8]) -> Result<HashMap<String, Vec<u8>>> {
    let encoded: HashMap<String, String> = serde_json::from_slice(raw)?;
    encoded
        .into_iter()
        .map(|(key, value)| {
            BASE64
                .decode(value.as_bytes())
                .map(|bytes| (key.clone(), bytes))
                .map_err(|_| CacheError::InvalidValue(key))
        })
        .collect()
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.persist(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        let value = entries.remove(key);
        if value.is_some() {
            self.persist(&entries).await?;
        }
        Ok(value)
    }
}
