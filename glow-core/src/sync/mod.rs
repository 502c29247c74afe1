//! Photo backup: the WiFi-gated upload queue, backup settings, and
//! restoring a library from the bucket.
mod backup;
mod network;
mod queue;
mod restore;
mod store;

use thiserror::Error;

use crate::backend::BackendError;
use crate::storage::StorageError;

pub use backup::BackupManager;
pub use network::{NetworkMonitor, NetworkState};
pub use queue::{SyncQueue, MAX_SYNC_RETRIES};
pub use restore::{
    plan_batches, IntegrityReport, RestorationEngine, RestorationResult, RestoreProgress,
};
pub use store::{QueueStore, SyncQueueItem};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Not connected to WiFi")]
    NotOnWifi,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Queue database error: {0}")]
    Queue(#[from] sqlx::Error),
}
