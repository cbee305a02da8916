//! JSON file transfer store.
//!
//! Keeps the whole queue in one pretty-printed JSON array. Writes go to a
//! sibling temp file that is renamed over the target, so a crash mid-save
//! leaves the previous state intact.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use ferry_core::{StoreError, TransferRecord, TransferStorePort};

/// [`TransferStorePort`] backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn unavailable(&self, err: &io::Error) -> StoreError {
        StoreError::Unavailable(format!("{}: {err}", self.path.display()))
    }
}

#[async_trait]
impl TransferStorePort for JsonFileStore {
    async fn save(&self, records: &[TransferRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(&e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| self.unavailable(&e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.unavailable(&e))
    }

    async fn load(&self) -> Result<Vec<TransferRecord>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.unavailable(&e)),
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }
}
