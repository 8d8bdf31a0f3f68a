//! Persistence interfaces for the notification log and the snapshot log.
//!
//! The external store is a collaborator, not part of this system: the traits
//! mirror its append-only contract and the in-memory implementations back
//! tests and standalone runs. Store failures are per-operation; callers log
//! and continue.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, PoisonError,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::monitor::data::AlertRecord;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record not found")]
    NotFound,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct StoredNotification {
    pub(crate) id: u64,
    pub(crate) title: String,
    pub(crate) message: String,
    pub(crate) larvae_count: u64,
    pub(crate) density_per_cm2: f64,
    pub(crate) created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct StoredSnapshot {
    pub(crate) url: String,
    pub(crate) size_bytes: usize,
    pub(crate) created_at: DateTime<Utc>,
}

/// Append-only log of dispatched alerts.
pub(crate) trait NotificationLog: Send + Sync {
    fn save(&self, record: &AlertRecord) -> Result<u64, StoreError>;
    fn list(&self) -> Result<Vec<StoredNotification>, StoreError>;
    fn delete(&self, id: u64) -> Result<(), StoreError>;
    fn delete_all(&self) -> Result<usize, StoreError>;
}

/// Append-only blob log for alert snapshots; `save` returns the public url.
pub(crate) trait SnapshotLog: Send + Sync {
    fn save(&self, jpeg: &[u8]) -> Result<String, StoreError>;
    fn list(&self) -> Result<Vec<StoredSnapshot>, StoreError>;
    fn delete(&self, url: &str) -> Result<(), StoreError>;
    fn delete_all(&self) -> Result<usize, StoreError>;
}

#[derive(Default)]
pub(crate) struct MemoryNotificationLog {
    entries: Mutex<Vec<StoredNotification>>,
    next_id: AtomicU64,
}

impl NotificationLog for MemoryNotificationLog {
    fn save(&self, record: &AlertRecord) -> Result<u64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut entries = lock(&self.entries);
        entries.push(StoredNotification {
            id,
            title: record.title.clone(),
            message: record.message.clone(),
            larvae_count: record.larvae_count,
            density_per_cm2: record.density_per_cm2,
            created_at: record.timestamp,
        });
        Ok(id)
    }

    fn list(&self) -> Result<Vec<StoredNotification>, StoreError> {
        Ok(lock(&self.entries).clone())
    }

    fn delete(&self, id: u64) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut entries = lock(&self.entries);
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

/// Listing-only reference store: it records what was uploaded, not the bytes
/// themselves, mirroring an external blob host that serves the urls.
#[derive(Default)]
pub(crate) struct MemorySnapshotLog {
    entries: Mutex<Vec<StoredSnapshot>>,
    next_seq: AtomicU64,
}

impl SnapshotLog for MemorySnapshotLog {
    fn save(&self, jpeg: &[u8]) -> Result<String, StoreError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let created_at = Utc::now();
        let url = format!(
            "memory://snapshots/snapshot_{}_{seq:04}.jpg",
            created_at.format("%Y%m%d_%H%M%S")
        );
        let mut entries = lock(&self.entries);
        entries.push(StoredSnapshot {
            url: url.clone(),
            size_bytes: jpeg.len(),
            created_at,
        });
        Ok(url)
    }

    fn list(&self) -> Result<Vec<StoredSnapshot>, StoreError> {
        Ok(lock(&self.entries).clone())
    }

    fn delete(&self, url: &str) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|entry| entry.url != url);
        if entries.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut entries = lock(&self.entries);
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
