//! Photo storage: the on-device store, the remote bucket, and the transfer
//! client that encrypts between them.
//!
//! Remote layout: `{user_id}/{photo_id}.jpg.encrypted`. Existing backups
//! depend on it.
mod bucket;
mod local;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod s3;
mod transfer;

use thiserror::Error;

use crate::encryption::EncryptionError;
use crate::keys::KeyError;

pub use bucket::{BucketError, PhotoBucket};
pub use local::{ImageCompressor, LocalPhotoStore, PassthroughCompressor, StorageInfo};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryBucket;
pub use s3::{S3Config, S3PhotoBucket};
pub use transfer::{PhotoTransfer, UploadedPhoto};

pub const REMOTE_SUFFIX: &str = ".jpg.encrypted";

/// Bucket-relative path of a photo's encrypted blob.
pub fn remote_photo_path(user_id: &str, photo_id: &str) -> String {
    format!("{}/{}{}", user_id, photo_id, REMOTE_SUFFIX)
}

/// Listing prefix for all of a user's blobs.
pub fn remote_user_prefix(user_id: &str) -> String {
    format!("{}/", user_id)
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Low storage: {free_bytes} bytes free, need {required_bytes}")]
    LowStorage { free_bytes: u64, required_bytes: u64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Cloud storage error: {0}")]
    Cloud(String),
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Image compression failed: {0}")]
    Compression(String),
}

impl From<BucketError> for StorageError {
    fn from(e: BucketError) -> Self {
        match e {
            BucketError::NotFound(key) => StorageError::NotFound(key),
            BucketError::Storage(msg) => StorageError::Cloud(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_path_layout() {
        assert_eq!(remote_photo_path("u1", "p1"), "u1/p1.jpg.encrypted");
        assert!(remote_photo_path("u1", "p1").starts_with(&remote_user_prefix("u1")));
    }
}
