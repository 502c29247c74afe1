use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoSyncStatus {
    #[default]
    LocalOnly,
    Pending,
    Synced,
    Failed,
}

/// A progress photo as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: String,
    pub user_id: String,
    /// Path on this device, if the file is here
    pub local_uri: Option<String>,
    /// Bucket-relative path of the encrypted blob
    pub remote_path: Option<String>,
    pub remote_url: Option<String>,
    #[serde(default)]
    pub sync_status: PhotoSyncStatus,
    pub captured_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl PhotoRecord {
    pub fn new_local(id: &str, user_id: &str, local_uri: &str) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            local_uri: Some(local_uri.to_string()),
            remote_path: None,
            remote_url: None,
            sync_status: PhotoSyncStatus::LocalOnly,
            captured_at: Utc::now(),
            uploaded_at: None,
            is_deleted: false,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote_path.is_some()
    }

    /// Apply an update in place, the same way the backend would.
    pub fn apply(&mut self, update: &PhotoUpdate) {
        match update {
            PhotoUpdate::Queued => self.sync_status = PhotoSyncStatus::Pending,
            PhotoUpdate::Uploaded {
                remote_path,
                remote_url,
                uploaded_at,
            } => {
                self.remote_path = Some(remote_path.clone());
                self.remote_url = Some(remote_url.clone());
                self.uploaded_at = Some(*uploaded_at);
                self.sync_status = PhotoSyncStatus::Synced;
            }
            PhotoUpdate::SyncFailed => self.sync_status = PhotoSyncStatus::Failed,
            PhotoUpdate::RemoteCleared => {
                self.remote_path = None;
                self.remote_url = None;
                self.uploaded_at = None;
                self.sync_status = PhotoSyncStatus::LocalOnly;
            }
            PhotoUpdate::Restored { local_uri } => self.local_uri = Some(local_uri.clone()),
            PhotoUpdate::Deleted => self.is_deleted = true,
        }
    }
}

/// Changes the pipeline makes to a photo record.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoUpdate {
    Queued,
    Uploaded {
        remote_path: String,
        remote_url: String,
        uploaded_at: DateTime<Utc>,
    },
    /// Gave up after repeated upload failures
    SyncFailed,
    /// Remote copy deleted (backup turned off)
    RemoteCleared,
    Restored {
        local_uri: String,
    },
    Deleted,
}

impl PhotoUpdate {
    /// Partial row for a PATCH.
    pub fn to_patch(&self) -> serde_json::Value {
        match self {
            PhotoUpdate::Queued => json!({ "sync_status": PhotoSyncStatus::Pending }),
            PhotoUpdate::Uploaded {
                remote_path,
                remote_url,
                uploaded_at,
            } => json!({
                "remote_path": remote_path,
                "remote_url": remote_url,
                "uploaded_at": uploaded_at,
                "sync_status": PhotoSyncStatus::Synced,
            }),
            PhotoUpdate::SyncFailed => json!({ "sync_status": PhotoSyncStatus::Failed }),
            PhotoUpdate::RemoteCleared => json!({
                "remote_path": null,
                "remote_url": null,
                "uploaded_at": null,
                "sync_status": PhotoSyncStatus::LocalOnly,
            }),
            PhotoUpdate::Restored { local_uri } => json!({ "local_uri": local_uri }),
            PhotoUpdate::Deleted => json!({ "is_deleted": true }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub id: String,
    pub user_id: String,
    pub routine_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
}

/// Terminal update written when a session completes or is abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub status: SessionStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub steps_completed: usize,
    pub steps_skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompletion {
    pub session_id: String,
    pub step_id: String,
    pub step_index: usize,
    pub outcome: StepOutcome,
    pub recorded_at: DateTime<Utc>,
}
