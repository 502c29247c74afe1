use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{remote_photo_path, remote_user_prefix, LocalPhotoStore, PhotoBucket, StorageError};
use crate::keys::KeyService;

/// Where an uploaded photo landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedPhoto {
    pub remote_url: String,
    pub remote_path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Moves photos between the device and the bucket, encrypting on the way
/// up and decrypting on the way down with the user's photo key.
#[derive(Clone)]
pub struct PhotoTransfer {
    bucket: Arc<dyn PhotoBucket>,
    keys: KeyService,
    local: LocalPhotoStore,
}

impl PhotoTransfer {
    pub fn new(bucket: Arc<dyn PhotoBucket>, keys: KeyService, local: LocalPhotoStore) -> Self {
        Self {
            bucket,
            keys,
            local,
        }
    }

    pub fn local(&self) -> &LocalPhotoStore {
        &self.local
    }

    /// Encrypt a local photo and upload it. Overwrites any existing blob.
    pub async fn upload(
        &self,
        local_path: &Path,
        photo_id: &str,
        user_id: &str,
    ) -> Result<UploadedPhoto, StorageError> {
        let plaintext = self.local.read(local_path).await?;
        let encryption = self.keys.get_or_create_photo_key(user_id).await?;
        let ciphertext = encryption.encrypt(&plaintext)?;

        let remote_path = remote_photo_path(user_id, photo_id);
        let size = ciphertext.len();
        self.bucket.write(&remote_path, ciphertext).await?;
        info!(photo_id, bytes = size, "Uploaded encrypted photo");

        Ok(UploadedPhoto {
            remote_url: self.bucket.url_for(&remote_path),
            remote_path,
            uploaded_at: Utc::now(),
        })
    }

    /// Download, decrypt and save a photo locally. Returns the local path.
    pub async fn download(
        &self,
        remote_path: &str,
        photo_id: &str,
        user_id: &str,
    ) -> Result<PathBuf, StorageError> {
        let encryption = self.keys.require_photo_key(user_id)?;
        let ciphertext = self.bucket.read(remote_path).await?;
        let plaintext = encryption.decrypt(&ciphertext)?;
        let path = self.local.write_photo(user_id, photo_id, &plaintext).await?;
        debug!(photo_id, "Restored photo to {}", path.display());
        Ok(path)
    }

    pub async fn delete_remote(&self, remote_path: &str) -> Result<(), StorageError> {
        self.bucket.delete(remote_path).await?;
        debug!("Deleted remote blob {}", remote_path);
        Ok(())
    }

    pub async fn remote_exists(&self, remote_path: &str) -> Result<bool, StorageError> {
        Ok(self.bucket.exists(remote_path).await?)
    }

    /// Every blob key stored for a user.
    pub async fn list_remote(&self, user_id: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.bucket.list(&remote_user_prefix(user_id)).await?)
    }
}
