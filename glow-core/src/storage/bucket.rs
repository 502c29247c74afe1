use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Raw object storage for encrypted photo blobs. One bucket per instance.
///
/// Deals in opaque bytes and bucket-relative keys. No encryption or path
/// layout knowledge.
#[async_trait]
pub trait PhotoBucket: Send + Sync {
    /// Create or overwrite.
    async fn write(&self, key: &str, data: Vec<u8>) -> Result<(), BucketError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, BucketError>;

    /// Keys under `prefix`. Metadata only, no bodies.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError>;

    async fn delete(&self, key: &str) -> Result<(), BucketError>;

    async fn exists(&self, key: &str) -> Result<bool, BucketError>;

    /// Addressable URL for a key, stored on the photo record.
    fn url_for(&self, key: &str) -> String;
}
