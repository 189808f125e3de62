//! Durable snapshot of every tab's history
//!
//! The whole store is one JSON document, `{"lotusRequests": {"<tabId>": [...]}}`,
//! read once at startup and rewritten wholesale after each mutation.

use lotus_common::{constants::STORAGE_KEY, CapturedRequest, TabId};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Every tab's history, oldest record first
pub type TabSnapshot = BTreeMap<TabId, Vec<CapturedRequest>>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode or decode snapshot: {0}")]
    Format(#[from] serde_json::Error),
}

/// JSON snapshot file on disk
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty store.
    pub async fn load(&self) -> Result<TabSnapshot, PersistenceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TabSnapshot::new()),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(TabSnapshot::new());
        }

        let mut document: Map<String, Value> = serde_json::from_str(&content)?;
        let Some(requests) = document.remove(STORAGE_KEY) else {
            return Ok(TabSnapshot::new());
        };

        let by_key: BTreeMap<String, Vec<CapturedRequest>> = serde_json::from_value(requests)?;
        let mut snapshot = TabSnapshot::new();
        for (key, history) in by_key {
            match key.parse::<TabId>() {
                Ok(tab_id) => {
                    snapshot.insert(tab_id, history);
                }
                Err(_) => tracing::warn!("Skipping stored history with invalid tab key {:?}", key),
            }
        }

        Ok(snapshot)
    }

    /// Replace the snapshot on disk (temp file + rename)
    pub async fn save(&self, snapshot: &TabSnapshot) -> Result<(), PersistenceError> {
        let by_key: BTreeMap<String, &Vec<CapturedRequest>> = snapshot
            .iter()
            .map(|(tab_id, history)| (tab_id.to_string(), history))
            .collect();

        let mut document = Map::new();
        document.insert(STORAGE_KEY.to_string(), serde_json::to_value(by_key)?);
        let content = serde_json::to_vec(&Value::Object(document))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(parent, source))?;
        }

        let tmp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|source| self.io_error(&tmp_path, source))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| self.io_error(&self.path, source))?;

        Ok(())
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
