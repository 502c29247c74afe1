use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    Backend, BackendError, NewSession, PhotoRecord, PhotoUpdate, SessionUpdate, StepCompletion,
};

#[derive(Default)]
struct State {
    photos: HashMap<String, PhotoRecord>,
    sessions: HashMap<String, (NewSession, Option<SessionUpdate>)>,
    steps: Vec<StepCompletion>,
    backup_enabled: HashMap<String, bool>,
}

/// In-process `Backend` for tests.
///
/// `fail_next_writes(n)` makes the next `n` write calls fail with a
/// retryable error.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    failing_writes: AtomicU32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), BackendError> {
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(BackendError::Status {
                status: 503,
                message: "injected failure".into(),
            })
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert_photo(&self, photo: PhotoRecord) {
        self.lock().photos.insert(photo.id.clone(), photo);
    }

    pub fn photo(&self, photo_id: &str) -> Option<PhotoRecord> {
        self.lock().photos.get(photo_id).cloned()
    }

    pub fn session(&self, session_id: &str) -> Option<(NewSession, Option<SessionUpdate>)> {
        self.lock().sessions.get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn step_completions(&self) -> Vec<StepCompletion> {
        self.lock().steps.clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_photos_for_user(&self, user_id: &str) -> Result<Vec<PhotoRecord>, BackendError> {
        let mut photos: Vec<PhotoRecord> = self
            .lock()
            .photos
            .values()
            .filter(|p| p.user_id == user_id && !p.is_deleted)
            .cloned()
            .collect();
        photos.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.id.cmp(&b.id)));
        Ok(photos)
    }

    async fn create_photo_record(&self, photo: &PhotoRecord) -> Result<(), BackendError> {
        self.maybe_fail()?;
        self.insert_photo(photo.clone());
        Ok(())
    }

    async fn update_photo_record(
        &self,
        photo_id: &str,
        update: &PhotoUpdate,
    ) -> Result<(), BackendError> {
        self.maybe_fail()?;
        let mut state = self.lock();
        let photo = state
            .photos
            .get_mut(photo_id)
            .ok_or_else(|| BackendError::NotFound(format!("photo {}", photo_id)))?;
        photo.apply(update);
        Ok(())
    }

    async fn create_session(&self, session: &NewSession) -> Result<(), BackendError> {
        self.maybe_fail()?;
        self.lock()
            .sessions
            .insert(session.id.clone(), (session.clone(), None));
        Ok(())
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), BackendError> {
        self.maybe_fail()?;
        let mut state = self.lock();
        let entry = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BackendError::NotFound(format!("session {}", session_id)))?;
        entry.0.status = update.status;
        entry.1 = Some(update.clone());
        Ok(())
    }

    async fn create_step_completion(&self, step: &StepCompletion) -> Result<(), BackendError> {
        self.maybe_fail()?;
        self.lock().steps.push(step.clone());
        Ok(())
    }

    async fn is_cloud_backup_enabled(&self, user_id: &str) -> Result<bool, BackendError> {
        Ok(self
            .lock()
            .backup_enabled
            .get(user_id)
            .copied()
            .unwrap_or(false))
    }

    async fn set_cloud_backup_enabled(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<(), BackendError> {
        self.maybe_fail()?;
        self.lock()
            .backup_enabled
            .insert(user_id.to_string(), enabled);
        Ok(())
    }
}
