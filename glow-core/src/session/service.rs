use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use glow_common::{ActiveSession, RoutineSession, SessionEvent, SessionOutcome, TransitionError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::outbox::Outbox;
use crate::backend::{Backend, BackendError, NewSession, SessionStatus};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session {session_id} is already in progress")]
    AlreadyActive { session_id: String },
    #[error("No active session")]
    NoActiveSession,
    #[error("Routine has no steps")]
    EmptyRoutine,
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl From<TransitionError> for SessionError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::AlreadyActive { session_id } => {
                SessionError::AlreadyActive { session_id }
            }
            TransitionError::NoActiveSession => SessionError::NoActiveSession,
            TransitionError::EmptyRoutine => SessionError::EmptyRoutine,
        }
    }
}

/// What the player shows when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub outcome: SessionOutcome,
    pub duration: Duration,
    pub steps_completed: usize,
    pub steps_skipped: usize,
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

/// The routine player's session, with persistence.
///
/// Transitions apply to the in-memory machine right away. Step and
/// terminal events go to the outbox and are written in the background.
/// `start` is the exception: it waits for the session record so later
/// events always have a row to attach to.
pub struct SessionService {
    machine: Mutex<RoutineSession>,
    backend: Arc<dyn Backend>,
    outbox: Outbox,
}

impl SessionService {
    pub fn new(backend: Arc<dyn Backend>, outbox: Outbox) -> Self {
        Self {
            machine: Mutex::new(RoutineSession::new()),
            backend,
            outbox,
        }
    }

    pub async fn start(
        &self,
        user_id: &str,
        routine_id: &str,
        step_count: usize,
    ) -> Result<ActiveSession, SessionError> {
        let mut machine = self.machine.lock().await;
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = machine
            .start(
                session_id.clone(),
                user_id.to_string(),
                routine_id.to_string(),
                step_count,
                now(),
            )?
            .clone();

        let record = NewSession {
            id: session_id.clone(),
            user_id: user_id.to_string(),
            routine_id: routine_id.to_string(),
            started_at: Utc::now(),
            status: SessionStatus::InProgress,
        };
        if let Err(e) = self.backend.create_session(&record).await {
            warn!(session_id = %session_id, "Could not create session record: {}", e);
            machine.discard();
            return Err(e.into());
        }

        info!(session_id = %session_id, routine_id, step_count, "Session started");
        Ok(session)
    }

    /// Copy of the in-progress session, if any.
    pub async fn active(&self) -> Option<ActiveSession> {
        self.machine.lock().await.active().cloned()
    }

    /// No-op (false) when already paused or idle.
    pub async fn pause(&self) -> bool {
        self.machine.lock().await.pause(now())
    }

    /// No-op (false) unless paused.
    pub async fn resume(&self) -> bool {
        self.machine.lock().await.resume(now())
    }

    pub async fn complete_step(&self, step_id: &str) -> Result<(), SessionError> {
        let event = self.machine.lock().await.complete_step(step_id)?;
        self.outbox.send(event);
        Ok(())
    }

    pub async fn skip_step(&self, step_id: &str) -> Result<(), SessionError> {
        let event = self.machine.lock().await.skip_step(step_id)?;
        self.outbox.send(event);
        Ok(())
    }

    pub async fn complete(&self) -> Result<SessionSummary, SessionError> {
        let event = self.machine.lock().await.complete(now())?;
        self.finish(event)
    }

    pub async fn abandon(&self) -> Result<SessionSummary, SessionError> {
        let event = self.machine.lock().await.abandon(now())?;
        self.finish(event)
    }

    fn finish(&self, event: SessionEvent) -> Result<SessionSummary, SessionError> {
        let SessionEvent::Finished {
            session_id,
            outcome,
            duration,
            steps_completed,
            steps_skipped,
        } = &event
        else {
            return Err(SessionError::NoActiveSession);
        };
        let summary = SessionSummary {
            session_id: session_id.clone(),
            outcome: *outcome,
            duration: *duration,
            steps_completed: *steps_completed,
            steps_skipped: *steps_skipped,
        };
        info!(
            session_id = %summary.session_id,
            outcome = ?summary.outcome,
            seconds = summary.duration.as_secs(),
            "Session finished"
        );
        self.outbox.send(event);
        Ok(summary)
    }

    /// Wait for queued events to be written.
    pub async fn flush(&self) {
        self.outbox.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::retry::RetryPolicy;
    use crate::session::spawn_outbox_worker;

    fn service() -> (Arc<MemoryBackend>, SessionService) {
        let backend = Arc::new(MemoryBackend::new());
        let (outbox, _worker) = spawn_outbox_worker(backend.clone(), RetryPolicy::PERSISTENCE);
        (backend.clone(), SessionService::new(backend, outbox))
    }

    #[tokio::test(start_paused = true)]
    async fn start_creates_record_and_blocks_second_start() {
        let (backend, sessions) = service();
        let session = sessions.start("u1", "r1", 3).await.unwrap();
        assert_eq!(session.current_step_index, 0);
        assert!(backend.session(&session.id).is_some());

        assert!(matches!(
            sessions.start("u1", "r2", 3).await,
            Err(SessionError::AlreadyActive { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_record_creation_leaves_no_session() {
        let (backend, sessions) = service();
        backend.fail_next_writes(1);
        assert!(matches!(
            sessions.start("u1", "r1", 3).await,
            Err(SessionError::Backend(_))
        ));
        assert!(sessions.active().await.is_none());
        assert!(sessions.start("u1", "r1", 3).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_is_excluded() {
        let (backend, sessions) = service();
        let session = sessions.start("u1", "r1", 2).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(sessions.pause().await);
        assert!(!sessions.pause().await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(sessions.resume().await);
        assert!(!sessions.resume().await);
        tokio::time::advance(Duration::from_secs(30)).await;

        sessions.complete_step("a").await.unwrap();
        sessions.skip_step("b").await.unwrap();
        let summary = sessions.complete().await.unwrap();
        assert_eq!(summary.duration, Duration::from_secs(90));
        assert_eq!(summary.steps_completed, 1);
        assert_eq!(summary.steps_skipped, 1);
        assert!(sessions.active().await.is_none());

        sessions.flush().await;
        let (record, update) = backend.session(&session.id).unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(update.unwrap().duration_seconds, 90);
        assert_eq!(backend.step_completions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_marks_session_abandoned() {
        let (backend, sessions) = service();
        let session = sessions.start("u1", "r1", 4).await.unwrap();
        let summary = sessions.abandon().await.unwrap();
        assert_eq!(summary.outcome, SessionOutcome::Abandoned);

        sessions.flush().await;
        assert_eq!(
            backend.session(&session.id).unwrap().0.status,
            SessionStatus::Abandoned
        );
        assert!(matches!(
            sessions.complete_step("x").await,
            Err(SessionError::NoActiveSession)
        ));
    }
}
