use std::collections::HashSet;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::SyncError;
use crate::backend::{Backend, PhotoRecord, PhotoUpdate};
use crate::config::DEFAULT_RESTORE_BATCH_SIZE;
use crate::storage::{PhotoTransfer, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreProgress {
    /// Items finished so far, including this one
    pub current: usize,
    pub total: usize,
    pub percentage: f64,
    pub photo_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestorationResult {
    pub total_photos: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failed_photo_ids: Vec<String>,
    pub duration_ms: u64,
}

/// Remote pointers that no longer resolve to a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Photos with a remote pointer
    pub checked: usize,
    pub missing: Vec<String>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Index ranges for `total` items in batches of `batch_size`.
pub fn plan_batches(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(total))
        .collect()
}

/// Brings a user's backed-up photos back onto this device.
#[derive(Clone)]
pub struct RestorationEngine {
    backend: Arc<dyn Backend>,
    transfer: PhotoTransfer,
    batch_size: usize,
}

impl RestorationEngine {
    pub fn new(backend: Arc<dyn Backend>, transfer: PhotoTransfer) -> Self {
        Self {
            backend,
            transfer,
            batch_size: DEFAULT_RESTORE_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Restore every photo of the user.
    ///
    /// Batches run one after another; photos within a batch download
    /// concurrently. Photos already on the device count as restored. A
    /// failed photo is recorded and never stops the rest.
    pub async fn restore_all<P>(
        &self,
        user_id: &str,
        on_progress: P,
    ) -> Result<RestorationResult, SyncError>
    where
        P: Fn(RestoreProgress) + Send + Sync,
    {
        let start = Instant::now();
        let photos = self.backend.get_photos_for_user(user_id).await?;
        let total = photos.len();
        info!(user_id, total, batch_size = self.batch_size, "Starting restore");

        let completed = AtomicUsize::new(0);
        let counter = &completed;
        let on_progress = &on_progress;
        let mut failed_photo_ids = Vec::new();

        for (batch_index, range) in plan_batches(total, self.batch_size).into_iter().enumerate() {
            let batch = &photos[range];
            let results = futures::future::join_all(batch.iter().map(|photo| async move {
                let result = self.restore_one(photo).await;
                let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
                on_progress(RestoreProgress {
                    current,
                    total,
                    percentage: current as f64 / total as f64 * 100.0,
                    photo_id: photo.id.clone(),
                });
                (photo, result)
            }))
            .await;

            for (photo, result) in results {
                if let Err(e) = result {
                    warn!(photo_id = %photo.id, "Restore failed: {}", e);
                    failed_photo_ids.push(photo.id.clone());
                }
            }
            info!(
                batch = batch_index + 1,
                done = completed.load(Ordering::SeqCst),
                total,
                "Restore batch finished"
            );
        }

        let result = RestorationResult {
            total_photos: total,
            success_count: total - failed_photo_ids.len(),
            failure_count: failed_photo_ids.len(),
            failed_photo_ids,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            success = result.success_count,
            failed = result.failure_count,
            duration_ms = result.duration_ms,
            "Restore finished"
        );
        Ok(result)
    }

    async fn restore_one(&self, photo: &PhotoRecord) -> Result<(), SyncError> {
        let local = self.transfer.local();
        if local.has_photo(&photo.user_id, &photo.id).await {
            return Ok(());
        }

        let remote_path = photo
            .remote_path
            .as_deref()
            .ok_or_else(|| StorageError::NotFound(format!("no remote copy of {}", photo.id)))?;
        let path = self
            .transfer
            .download(remote_path, &photo.id, &photo.user_id)
            .await?;

        if let Err(e) = self
            .backend
            .update_photo_record(
                &photo.id,
                &PhotoUpdate::Restored {
                    local_uri: path.to_string_lossy().into_owned(),
                },
            )
            .await
        {
            warn!(photo_id = %photo.id, "Restored but failed to update record: {}", e);
        }
        Ok(())
    }

    /// Check every remote pointer against one listing of the user's prefix.
    pub async fn verify_integrity(&self, user_id: &str) -> Result<IntegrityReport, SyncError> {
        let photos = self.backend.get_photos_for_user(user_id).await?;
        let remote: HashSet<String> = self
            .transfer
            .list_remote(user_id)
            .await?
            .into_iter()
            .collect();

        let mut report = IntegrityReport {
            checked: 0,
            missing: Vec::new(),
        };
        for photo in &photos {
            let Some(remote_path) = photo.remote_path.as_deref() else {
                continue;
            };
            report.checked += 1;
            if !remote.contains(remote_path) {
                report.missing.push(photo.id.clone());
            }
        }

        if report.is_intact() {
            info!(user_id, checked = report.checked, "Backup integrity verified");
        } else {
            warn!(
                user_id,
                missing = report.missing.len(),
                "Backup has broken remote pointers"
            );
        }
        Ok(report)
    }
}
