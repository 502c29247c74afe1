use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::StorageError;

/// Black-box image compression applied at capture time.
pub trait ImageCompressor: Send + Sync {
    fn compress(&self, image: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// Stores the captured bytes as-is.
pub struct PassthroughCompressor;

impl ImageCompressor for PassthroughCompressor {
    fn compress(&self, image: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(image.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub free_bytes: u64,
    /// Bytes used by stored photos
    pub used_bytes: u64,
    pub photo_count: usize,
}

/// Photos on this device, under `{root}/{user_id}/{photo_id}.jpg`.
#[derive(Clone)]
pub struct LocalPhotoStore {
    root: PathBuf,
    compressor: Arc<dyn ImageCompressor>,
    low_storage_threshold: u64,
}

impl LocalPhotoStore {
    pub fn new(root: PathBuf, low_storage_threshold: u64) -> Self {
        Self {
            root,
            compressor: Arc::new(PassthroughCompressor),
            low_storage_threshold,
        }
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn ImageCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn photo_path(&self, user_id: &str, photo_id: &str) -> PathBuf {
        self.root.join(user_id).join(format!("{}.jpg", photo_id))
    }

    /// Compress and save a captured photo. Fails with `LowStorage` if the
    /// device is under the free-space threshold.
    pub async fn save_photo(
        &self,
        user_id: &str,
        photo_id: &str,
        image: &[u8],
    ) -> Result<PathBuf, StorageError> {
        self.ensure_capacity(image.len() as u64)?;
        let compressed = self.compressor.compress(image)?;
        let path = self.write_photo(user_id, photo_id, &compressed).await?;
        info!(
            photo_id,
            original = image.len(),
            stored = compressed.len(),
            "Saved photo"
        );
        Ok(path)
    }

    /// Write already-processed bytes (e.g. a restored photo).
    pub async fn write_photo(
        &self,
        user_id: &str,
        photo_id: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.photo_path(user_id, photo_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so a crash never leaves a truncated photo.
        let tmp = path.with_extension("jpg.part");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    pub async fn has_photo(&self, user_id: &str, photo_id: &str) -> bool {
        tokio::fs::try_exists(self.photo_path(user_id, photo_id))
            .await
            .unwrap_or(false)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a photo file. Already gone is fine.
    pub async fn delete_photo(&self, user_id: &str, photo_id: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.photo_path(user_id, photo_id)).await {
            Ok(()) => {
                debug!(photo_id, "Deleted local photo");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn free_space(&self) -> Result<u64, StorageError> {
        free_space_at(&existing_ancestor(&self.root))
    }

    pub fn is_low_storage(&self) -> Result<bool, StorageError> {
        Ok(self.free_space()? < self.low_storage_threshold)
    }

    /// Check there is room for `incoming` more bytes above the threshold.
    pub fn ensure_capacity(&self, incoming: u64) -> Result<(), StorageError> {
        let free_bytes = self.free_space()?;
        let required_bytes = self.low_storage_threshold.saturating_add(incoming);
        if free_bytes < required_bytes {
            warn!(free_bytes, required_bytes, "Device storage is low");
            return Err(StorageError::LowStorage {
                free_bytes,
                required_bytes,
            });
        }
        Ok(())
    }

    pub async fn storage_info(&self) -> Result<StorageInfo, StorageError> {
        let root = self.root.clone();
        let (used_bytes, photo_count) =
            tokio::task::spawn_blocking(move || dir_usage(&root))
                .await
                .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;
        Ok(StorageInfo {
            free_bytes: self.free_space()?,
            used_bytes,
            photo_count,
        })
    }
}

/// Total size and count of `.jpg` files under `dir`.
fn dir_usage(dir: &Path) -> Result<(u64, usize), std::io::Error> {
    let mut bytes = 0;
    let mut count = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else if entry.path().extension().is_some_and(|e| e == "jpg") {
                bytes += meta.len();
                count += 1;
            }
        }
    }
    Ok((bytes, count))
}

/// The store's root may not exist yet; statvfs needs a real path.
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

#[cfg(unix)]
fn free_space_at(path: &Path) -> Result<u64, StorageError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
    let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let stat = unsafe { stat.assume_init() };
    #[allow(clippy::unnecessary_cast)]
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_space_at(_path: &Path) -> Result<u64, StorageError> {
    Ok(u64::MAX)
}
