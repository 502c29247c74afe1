//! Persists session events in the background.
//!
//! The session machine updates in memory immediately; its events are queued
//! here and written to the backend in order, with retry. A write that still
//! fails after the retries is logged and dropped.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use glow_common::{SessionEvent, SessionOutcome};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::backend::{
    Backend, BackendError, SessionStatus, SessionUpdate, StepCompletion, StepOutcome,
};
use crate::retry::{retry_with_backoff, RetryPolicy};

enum OutboxMessage {
    Event {
        event: SessionEvent,
        at: DateTime<Utc>,
    },
    Flush(oneshot::Sender<()>),
}

/// Sending side of the outbox.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboxMessage>,
}

impl Outbox {
    /// Queue an event. Never blocks.
    pub fn send(&self, event: SessionEvent) {
        let message = OutboxMessage::Event {
            event,
            at: Utc::now(),
        };
        if self.tx.send(message).is_err() {
            error!("Session outbox worker is gone, event dropped");
        }
    }

    /// Wait until everything sent before this call has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(OutboxMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Start the worker. It stops once every `Outbox` handle is dropped.
pub fn spawn_outbox_worker(
    backend: Arc<dyn Backend>,
    policy: RetryPolicy,
) -> (Outbox, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                OutboxMessage::Event { event, at } => {
                    if let Err(e) = persist(backend.as_ref(), policy, &event, at).await {
                        error!("Failed to persist session event {:?}: {}", event, e);
                    }
                }
                OutboxMessage::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Session outbox worker stopped");
    });
    (Outbox { tx }, handle)
}

async fn persist(
    backend: &dyn Backend,
    policy: RetryPolicy,
    event: &SessionEvent,
    at: DateTime<Utc>,
) -> Result<(), BackendError> {
    match event {
        SessionEvent::StepCompleted {
            session_id,
            step_id,
            step_index,
        }
        | SessionEvent::StepSkipped {
            session_id,
            step_id,
            step_index,
        } => {
            let outcome = if matches!(event, SessionEvent::StepCompleted { .. }) {
                StepOutcome::Completed
            } else {
                StepOutcome::Skipped
            };
            let step = StepCompletion {
                session_id: session_id.clone(),
                step_id: step_id.clone(),
                step_index: *step_index,
                outcome,
                recorded_at: at,
            };
            retry_with_backoff(policy, "record step", || backend.create_step_completion(&step))
                .await
        }
        SessionEvent::Finished {
            session_id,
            outcome,
            duration,
            steps_completed,
            steps_skipped,
        } => {
            let update = SessionUpdate {
                status: match outcome {
                    SessionOutcome::Completed => SessionStatus::Completed,
                    SessionOutcome::Abandoned => SessionStatus::Abandoned,
                },
                completed_at: at,
                duration_seconds: duration.as_secs(),
                steps_completed: *steps_completed,
                steps_skipped: *steps_skipped,
            };
            retry_with_backoff(policy, "finish session", || {
                backend.update_session(session_id, &update)
            })
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, NewSession};
    use std::time::Duration;

    async fn backend_with_session() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_session(&NewSession {
                id: "s1".into(),
                user_id: "u1".into(),
                routine_id: "r1".into(),
                started_at: Utc::now(),
                status: SessionStatus::InProgress,
            })
            .await
            .unwrap();
        backend
    }

    #[tokio::test(start_paused = true)]
    async fn persists_events_in_order() {
        let backend = backend_with_session().await;
        let (outbox, _worker) = spawn_outbox_worker(backend.clone(), RetryPolicy::PERSISTENCE);

        outbox.send(SessionEvent::StepCompleted {
            session_id: "s1".into(),
            step_id: "a".into(),
            step_index: 0,
        });
        outbox.send(SessionEvent::StepSkipped {
            session_id: "s1".into(),
            step_id: "b".into(),
            step_index: 1,
        });
        outbox.send(SessionEvent::Finished {
            session_id: "s1".into(),
            outcome: SessionOutcome::Completed,
            duration: Duration::from_secs(95),
            steps_completed: 1,
            steps_skipped: 1,
        });
        outbox.flush().await;

        let steps = backend.step_completions();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].outcome, StepOutcome::Completed);
        assert_eq!(steps[1].outcome, StepOutcome::Skipped);

        let (session, update) = backend.session("s1").unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(update.unwrap().duration_seconds, 95);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let backend = backend_with_session().await;
        let (outbox, _worker) = spawn_outbox_worker(backend.clone(), RetryPolicy::PERSISTENCE);

        backend.fail_next_writes(2);
        outbox.send(SessionEvent::StepCompleted {
            session_id: "s1".into(),
            step_id: "a".into(),
            step_index: 0,
        });
        outbox.flush().await;

        assert_eq!(backend.step_completions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retries_and_moves_on() {
        let backend = backend_with_session().await;
        let (outbox, _worker) = spawn_outbox_worker(backend.clone(), RetryPolicy::PERSISTENCE);

        backend.fail_next_writes(RetryPolicy::PERSISTENCE.max_retries + 1);
        outbox.send(SessionEvent::StepCompleted {
            session_id: "s1".into(),
            step_id: "lost".into(),
            step_index: 0,
        });
        outbox.send(SessionEvent::StepCompleted {
            session_id: "s1".into(),
            step_id: "kept".into(),
            step_index: 1,
        });
        outbox.flush().await;

        let steps = backend.step_completions();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_id, "kept");
    }
}
