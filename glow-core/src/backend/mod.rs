//! The hosted database, seen from the client.
//!
//! The pipeline only needs a handful of operations on photo and session
//! records. `RestBackend` talks to a PostgREST-style API; `MemoryBackend`
//! keeps everything in process for tests.
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod models;
mod rest;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::Retryable;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryBackend;
pub use models::{
    NewSession, PhotoRecord, PhotoSyncStatus, PhotoUpdate, SessionStatus, SessionUpdate,
    StepCompletion, StepOutcome,
};
pub use rest::RestBackend;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Network(String),
    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid backend response: {0}")]
    Decode(String),
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        match self {
            BackendError::Network(_) => true,
            BackendError::Status { status, .. } => *status == 429 || (500..=504).contains(status),
            BackendError::NotFound(_) | BackendError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => BackendError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None if e.is_decode() => BackendError::Decode(e.to_string()),
            None => BackendError::Network(e.to_string()),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Photos for a user, deleted ones excluded, oldest capture first.
    async fn get_photos_for_user(&self, user_id: &str) -> Result<Vec<PhotoRecord>, BackendError>;

    async fn create_photo_record(&self, photo: &PhotoRecord) -> Result<(), BackendError>;

    async fn update_photo_record(
        &self,
        photo_id: &str,
        update: &PhotoUpdate,
    ) -> Result<(), BackendError>;

    async fn create_session(&self, session: &NewSession) -> Result<(), BackendError>;

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), BackendError>;

    async fn create_step_completion(&self, step: &StepCompletion) -> Result<(), BackendError>;

    async fn is_cloud_backup_enabled(&self, user_id: &str) -> Result<bool, BackendError>;

    async fn set_cloud_backup_enabled(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<(), BackendError>;
}
