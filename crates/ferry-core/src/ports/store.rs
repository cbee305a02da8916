//! Transfer store port definition.
//!
//! This port defines the interface for persisting transfer records so the
//! queue survives application restarts. The on-disk format belongs to the
//! implementation; the queue only saves and loads whole record lists.
//!
//! # Persistence Scope
//!
//! **Persisted:** every record, including terminal ones (they stay visible
//! until the caller removes them).
//!
//! **Restored as:** `Queued`/`Downloading` records re-enter their bucket as
//! `Queued` with `retry_count` preserved; `Paused` stays paused; terminal
//! records are kept for display. Nothing resumes straight into `Downloading`.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::transfer::TransferRecord;

/// Errors surfaced by a transfer store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The storage medium failed.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("Corrupt transfer data: {0}")]
    Corrupt(String),
}

/// Port for persisting transfer records.
#[async_trait]
pub trait TransferStorePort: Send + Sync {
    /// Replace the stored records with `records`.
    async fn save(&self, records: &[TransferRecord]) -> Result<(), StoreError>;

    /// Load every stored record.
    async fn load(&self) -> Result<Vec<TransferRecord>, StoreError>;
}

/// A store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransferStore;

#[async_trait]
impl TransferStorePort for NoopTransferStore {
    async fn save(&self, _records: &[TransferRecord]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(Vec::new())
    }
}

/// In-memory store, mostly for tests and embedding without a disk.
#[derive(Debug, Default)]
pub struct MemoryTransferStore {
    records: Mutex<Vec<TransferRecord>>,
    saves: Mutex<u64>,
}

impl MemoryTransferStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with records (simulates a previous session).
    #[must_use]
    pub fn with_records(records: Vec<TransferRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            saves: Mutex::new(0),
        }
    }

    /// Copy of the last saved records.
    pub async fn records(&self) -> Vec<TransferRecord> {
        self.records.lock().await.clone()
    }

    /// How many times `save` has been called.
    pub async fn save_count(&self) -> u64 {
        *self.saves.lock().await
    }
}

#[async_trait]
impl TransferStorePort for MemoryTransferStore {
    async fn save(&self, records: &[TransferRecord]) -> Result<(), StoreError> {
        *self.records.lock().await = records.to_vec();
        *self.saves.lock().await += 1;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }
}
