use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::{SyncError, SyncQueue};
use crate::backend::{Backend, PhotoRecord, PhotoSyncStatus, PhotoUpdate};
use crate::storage::PhotoTransfer;

/// The user-facing backup switch and photo deletion.
#[derive(Clone)]
pub struct BackupManager {
    backend: Arc<dyn Backend>,
    queue: SyncQueue,
    transfer: PhotoTransfer,
}

impl BackupManager {
    pub fn new(backend: Arc<dyn Backend>, queue: SyncQueue, transfer: PhotoTransfer) -> Self {
        Self {
            backend,
            queue,
            transfer,
        }
    }

    pub async fn is_enabled(&self, user_id: &str) -> Result<bool, SyncError> {
        Ok(self.backend.is_cloud_backup_enabled(user_id).await?)
    }

    /// Turn backup on and queue every photo that only exists on this
    /// device. Returns how many were queued.
    pub async fn enable_backup(&self, user_id: &str) -> Result<usize, SyncError> {
        self.backend.set_cloud_backup_enabled(user_id, true).await?;

        let mut queued = 0;
        for photo in self.backend.get_photos_for_user(user_id).await? {
            let Some(local_uri) = needs_upload(&photo) else {
                continue;
            };
            if self
                .queue
                .push(&photo.id, user_id, &PathBuf::from(local_uri))
                .await?
            {
                queued += 1;
            }
        }
        info!(user_id, queued, "Cloud backup enabled");

        self.queue.process_queue().await;
        Ok(queued)
    }

    /// Turn backup off and empty the user's queue. With `delete_existing`,
    /// also delete every remote blob and clear the pointers. Returns how
    /// many blobs were deleted.
    pub async fn disable_backup(
        &self,
        user_id: &str,
        delete_existing: bool,
    ) -> Result<usize, SyncError> {
        self.backend.set_cloud_backup_enabled(user_id, false).await?;
        self.queue.clear_user(user_id).await?;

        if !delete_existing {
            info!(user_id, "Cloud backup disabled, remote copies kept");
            return Ok(0);
        }

        let mut deleted = 0;
        for photo in self.backend.get_photos_for_user(user_id).await? {
            let Some(remote_path) = photo.remote_path.as_deref() else {
                continue;
            };
            if let Err(e) = self.transfer.delete_remote(remote_path).await {
                warn!(photo_id = %photo.id, "Failed to delete remote copy: {}", e);
                continue;
            }
            self.backend
                .update_photo_record(&photo.id, &PhotoUpdate::RemoteCleared)
                .await?;
            deleted += 1;
        }
        info!(user_id, deleted, "Cloud backup disabled, remote copies deleted");
        Ok(deleted)
    }

    /// Delete a photo everywhere: this device, the bucket, the queue, and
    /// mark the record deleted.
    pub async fn delete_photo(&self, photo: &PhotoRecord) -> Result<(), SyncError> {
        self.queue.remove(&photo.id).await;

        self.transfer
            .local()
            .delete_photo(&photo.user_id, &photo.id)
            .await?;
        if let Some(remote_path) = photo.remote_path.as_deref() {
            self.transfer.delete_remote(remote_path).await?;
        }

        self.backend
            .update_photo_record(&photo.id, &PhotoUpdate::Deleted)
            .await?;
        info!(photo_id = %photo.id, "Photo deleted");
        Ok(())
    }
}

/// The local path to upload, if this photo has no remote copy yet.
fn needs_upload(photo: &PhotoRecord) -> Option<&str> {
    if photo.has_remote() || photo.sync_status == PhotoSyncStatus::Synced {
        return None;
    }
    photo.local_uri.as_deref()
}
