use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    Backend, BackendError, NewSession, PhotoRecord, PhotoUpdate, SessionUpdate, StepCompletion,
};

const PHOTOS: &str = "progress_photos";
const SESSIONS: &str = "routine_sessions";
const STEP_COMPLETIONS: &str = "step_completions";
const SETTINGS: &str = "user_settings";

/// `Backend` over a PostgREST-style HTTP API (`/rest/v1/{table}`).
#[derive(Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct BackupSetting {
    #[serde(default)]
    cloud_backup_enabled: bool,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
        }
    }

    /// Act as a signed-in user instead of the anonymous key.
    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/rest/v1/{}", self.base_url, table)
        } else {
            format!("{}/rest/v1/{}?{}", self.base_url, table, query)
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        warn!("Backend returned {}: {}", status, message);
        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn insert(&self, table: &str, row: serde_json::Value) -> Result<(), BackendError> {
        let resp = self
            .request(reqwest::Method::POST, &self.table_url(table, ""))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// PATCH rows matching `id`. NotFound if nothing matched.
    async fn patch_by_id(
        &self,
        table: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<(), BackendError> {
        let query = format!("id=eq.{}", urlencoding::encode(id));
        let resp = self
            .request(reqwest::Method::PATCH, &self.table_url(table, &query))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        if rows.is_empty() {
            return Err(BackendError::NotFound(format!("{} {}", table, id)));
        }
        Ok(())
    }
}

fn to_row<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, BackendError> {
    serde_json::to_value(value).map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl Backend for RestBackend {
    async fn get_photos_for_user(&self, user_id: &str) -> Result<Vec<PhotoRecord>, BackendError> {
        let query = format!(
            "user_id=eq.{}&is_deleted=eq.false&order=captured_at.asc",
            urlencoding::encode(user_id)
        );
        let resp = self
            .request(reqwest::Method::GET, &self.table_url(PHOTOS, &query))
            .send()
            .await?;
        let photos: Vec<PhotoRecord> = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        debug!(user_id, count = photos.len(), "Fetched photo records");
        Ok(photos)
    }

    async fn create_photo_record(&self, photo: &PhotoRecord) -> Result<(), BackendError> {
        self.insert(PHOTOS, to_row(photo)?).await
    }

    async fn update_photo_record(
        &self,
        photo_id: &str,
        update: &PhotoUpdate,
    ) -> Result<(), BackendError> {
        self.patch_by_id(PHOTOS, photo_id, update.to_patch()).await
    }

    async fn create_session(&self, session: &NewSession) -> Result<(), BackendError> {
        self.insert(SESSIONS, to_row(session)?).await
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), BackendError> {
        self.patch_by_id(SESSIONS, session_id, to_row(update)?).await
    }

    async fn create_step_completion(&self, step: &StepCompletion) -> Result<(), BackendError> {
        self.insert(STEP_COMPLETIONS, to_row(step)?).await
    }

    async fn is_cloud_backup_enabled(&self, user_id: &str) -> Result<bool, BackendError> {
        let query = format!(
            "user_id=eq.{}&select=cloud_backup_enabled",
            urlencoding::encode(user_id)
        );
        let resp = self
            .request(reqwest::Method::GET, &self.table_url(SETTINGS, &query))
            .send()
            .await?;
        let rows: Vec<BackupSetting> = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(rows.first().is_some_and(|r| r.cloud_backup_enabled))
    }

    async fn set_cloud_backup_enabled(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<(), BackendError> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &self.table_url(SETTINGS, "on_conflict=user_id"),
            )
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!({ "user_id": user_id, "cloud_backup_enabled": enabled }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}
