use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Abandoned,
}

/// Something the app shell must persist after a transition.
///
/// The machine itself never does I/O. Callers drain these into an outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StepCompleted {
        session_id: String,
        step_id: String,
        step_index: usize,
    },
    StepSkipped {
        session_id: String,
        step_id: String,
        step_index: usize,
    },
    Finished {
        session_id: String,
        outcome: SessionOutcome,
        /// Active time: wall time minus paused time.
        duration: Duration,
        steps_completed: usize,
        steps_skipped: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// `start` was called while another session is in progress
    AlreadyActive { session_id: String },
    /// A step or terminal transition was requested with no session
    NoActiveSession,
    /// A routine with no steps cannot be played
    EmptyRoutine,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::AlreadyActive { session_id } => {
                write!(f, "session {} is already in progress", session_id)
            }
            TransitionError::NoActiveSession => write!(f, "no active session"),
            TransitionError::EmptyRoutine => write!(f, "routine has no steps"),
        }
    }
}

impl std::error::Error for TransitionError {}

/// An in-progress guided routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub id: String,
    pub user_id: String,
    pub routine_id: String,
    pub started_at: Instant,
    pub step_count: usize,
    /// Never decreases, never exceeds `step_count - 1`.
    pub current_step_index: usize,
    pub completed_steps: BTreeSet<String>,
    pub skipped_steps: BTreeSet<String>,
    pub is_paused: bool,
    pub paused_at: Option<Instant>,
    pub total_paused: Duration,
}

impl ActiveSession {
    /// Time since start minus completed pauses. A pause still open at `now`
    /// has not been folded into `total_paused` yet, so it counts as elapsed.
    pub fn active_duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
            .saturating_sub(self.total_paused)
    }

    pub fn is_on_last_step(&self) -> bool {
        self.current_step_index + 1 >= self.step_count
    }

    fn advance(&mut self) {
        let last = self.step_count.saturating_sub(1);
        self.current_step_index = (self.current_step_index + 1).min(last);
    }
}

/// State machine for the routine player.
///
/// `NoSession -> InProgress(running) <-> InProgress(paused) -> NoSession`.
/// Completing or skipping the last step does not end the session; the player
/// calls `complete` explicitly.
#[derive(Debug, Default)]
pub struct RoutineSession {
    active: Option<ActiveSession>,
}

impl RoutineSession {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(
        &mut self,
        session_id: String,
        user_id: String,
        routine_id: String,
        step_count: usize,
        now: Instant,
    ) -> Result<&ActiveSession, TransitionError> {
        if let Some(existing) = &self.active {
            return Err(TransitionError::AlreadyActive {
                session_id: existing.id.clone(),
            });
        }
        if step_count == 0 {
            return Err(TransitionError::EmptyRoutine);
        }

        Ok(&*self.active.insert(ActiveSession {
            id: session_id,
            user_id,
            routine_id,
            started_at: now,
            step_count,
            current_step_index: 0,
            completed_steps: BTreeSet::new(),
            skipped_steps: BTreeSet::new(),
            is_paused: false,
            paused_at: None,
            total_paused: Duration::ZERO,
        }))
    }

    /// Returns true if the session transitioned to paused.
    pub fn pause(&mut self, now: Instant) -> bool {
        match self.active.as_mut() {
            Some(session) if !session.is_paused => {
                session.is_paused = true;
                session.paused_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Returns true if the session transitioned back to running.
    pub fn resume(&mut self, now: Instant) -> bool {
        match self.active.as_mut() {
            Some(session) if session.is_paused => {
                if let Some(paused_at) = session.paused_at.take() {
                    session.total_paused += now.saturating_duration_since(paused_at);
                }
                session.is_paused = false;
                true
            }
            _ => false,
        }
    }

    pub fn complete_step(&mut self, step_id: &str) -> Result<SessionEvent, TransitionError> {
        let session = self
            .active
            .as_mut()
            .ok_or(TransitionError::NoActiveSession)?;
        let step_index = session.current_step_index;

        session.skipped_steps.remove(step_id);
        session.completed_steps.insert(step_id.to_string());
        session.advance();

        Ok(SessionEvent::StepCompleted {
            session_id: session.id.clone(),
            step_id: step_id.to_string(),
            step_index,
        })
    }

    pub fn skip_step(&mut self, step_id: &str) -> Result<SessionEvent, TransitionError> {
        let session = self
            .active
            .as_mut()
            .ok_or(TransitionError::NoActiveSession)?;
        let step_index = session.current_step_index;

        session.completed_steps.remove(step_id);
        session.skipped_steps.insert(step_id.to_string());
        session.advance();

        Ok(SessionEvent::StepSkipped {
            session_id: session.id.clone(),
            step_id: step_id.to_string(),
            step_index,
        })
    }

    pub fn complete(&mut self, now: Instant) -> Result<SessionEvent, TransitionError> {
        self.finish(SessionOutcome::Completed, now)
    }

    pub fn abandon(&mut self, now: Instant) -> Result<SessionEvent, TransitionError> {
        self.finish(SessionOutcome::Abandoned, now)
    }

    /// Drop the in-memory session without producing an event.
    /// Used when the session record could not be created.
    pub fn discard(&mut self) -> Option<ActiveSession> {
        self.active.take()
    }

    fn finish(
        &mut self,
        outcome: SessionOutcome,
        now: Instant,
    ) -> Result<SessionEvent, TransitionError> {
        let session = self.active.take().ok_or(TransitionError::NoActiveSession)?;
        Ok(SessionEvent::Finished {
            outcome,
            duration: session.active_duration(now),
            steps_completed: session.completed_steps.len(),
            steps_skipped: session.skipped_steps.len(),
            session_id: session.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(step_count: usize) -> (RoutineSession, Instant) {
        let now = Instant::now();
        let mut machine = RoutineSession::new();
        machine
            .start("s1".into(), "u1".into(), "r1".into(), step_count, now)
            .unwrap();
        (machine, now)
    }

    #[test]
    fn start_initializes_session() {
        let (machine, now) = started(3);
        let s = machine.active().unwrap();
        assert_eq!(s.current_step_index, 0);
        assert!(s.completed_steps.is_empty());
        assert!(s.skipped_steps.is_empty());
        assert!(!s.is_paused);
        assert_eq!(s.total_paused, Duration::ZERO);
        assert_eq!(s.started_at, now);
    }

    #[test]
    fn start_twice_is_rejected() {
        let (mut machine, now) = started(3);
        let err = machine
            .start("s2".into(), "u1".into(), "r2".into(), 3, now)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::AlreadyActive {
                session_id: "s1".into()
            }
        );
    }

    #[test]
    fn start_with_no_steps_is_rejected() {
        let mut machine = RoutineSession::new();
        let err = machine
            .start("s1".into(), "u1".into(), "r1".into(), 0, Instant::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::EmptyRoutine);
        assert!(!machine.is_active());
    }

    #[test]
    fn pause_then_immediate_resume_adds_nothing() {
        let (mut machine, now) = started(3);
        assert!(machine.pause(now));
        assert!(machine.resume(now));
        assert_eq!(machine.active().unwrap().total_paused, Duration::ZERO);
    }

    #[test]
    fn pause_and_resume_accumulate() {
        let (mut machine, now) = started(3);
        machine.pause(now + Duration::from_secs(10));
        machine.resume(now + Duration::from_secs(25));
        machine.pause(now + Duration::from_secs(30));
        machine.resume(now + Duration::from_secs(35));
        assert_eq!(
            machine.active().unwrap().total_paused,
            Duration::from_secs(20)
        );
    }

    #[test]
    fn pause_and_resume_are_noops_when_not_applicable() {
        let mut idle = RoutineSession::new();
        assert!(!idle.pause(Instant::now()));
        assert!(!idle.resume(Instant::now()));

        let (mut machine, now) = started(3);
        assert!(!machine.resume(now));
        assert!(machine.pause(now));
        assert!(!machine.pause(now + Duration::from_secs(5)));
        let s = machine.active().unwrap();
        assert_eq!(s.paused_at, Some(now));
    }

    #[test]
    fn steps_advance_and_cap_at_last() {
        let (mut machine, _) = started(2);
        machine.complete_step("a").unwrap();
        assert_eq!(machine.active().unwrap().current_step_index, 1);
        machine.skip_step("b").unwrap();
        assert_eq!(machine.active().unwrap().current_step_index, 1);
        machine.complete_step("c").unwrap();
        assert_eq!(machine.active().unwrap().current_step_index, 1);
        // Stepping past the end does not finish the session.
        assert!(machine.is_active());
    }

    #[test]
    fn step_events_carry_index_before_advance() {
        let (mut machine, _) = started(3);
        machine.complete_step("a").unwrap();
        let event = machine.skip_step("b").unwrap();
        assert_eq!(
            event,
            SessionEvent::StepSkipped {
                session_id: "s1".into(),
                step_id: "b".into(),
                step_index: 1,
            }
        );
    }

    #[test]
    fn step_id_lives_in_one_set_only() {
        let (mut machine, _) = started(4);
        machine.complete_step("a").unwrap();
        machine.skip_step("a").unwrap();
        let s = machine.active().unwrap();
        assert!(!s.completed_steps.contains("a"));
        assert!(s.skipped_steps.contains("a"));

        machine.complete_step("a").unwrap();
        let s = machine.active().unwrap();
        assert!(s.completed_steps.contains("a"));
        assert!(!s.skipped_steps.contains("a"));
    }

    #[test]
    fn complete_subtracts_paused_time() {
        let (mut machine, now) = started(3);
        machine.complete_step("a").unwrap();
        machine.skip_step("b").unwrap();
        machine.pause(now + Duration::from_secs(60));
        machine.resume(now + Duration::from_secs(90));

        let event = machine.complete(now + Duration::from_secs(300)).unwrap();
        assert_eq!(
            event,
            SessionEvent::Finished {
                session_id: "s1".into(),
                outcome: SessionOutcome::Completed,
                duration: Duration::from_secs(270),
                steps_completed: 1,
                steps_skipped: 1,
            }
        );
        assert!(!machine.is_active());
    }

    #[test]
    fn complete_while_paused_counts_open_pause_as_elapsed() {
        let (mut machine, now) = started(3);
        machine.pause(now + Duration::from_secs(100));
        let event = machine.complete(now + Duration::from_secs(160)).unwrap();
        match event {
            SessionEvent::Finished { duration, .. } => {
                assert_eq!(duration, Duration::from_secs(160))
            }
            other => panic!("Expected Finished, got {:?}", other),
        }
    }

    #[test]
    fn abandon_clears_session() {
        let (mut machine, now) = started(3);
        let event = machine.abandon(now).unwrap();
        assert!(matches!(
            event,
            SessionEvent::Finished {
                outcome: SessionOutcome::Abandoned,
                ..
            }
        ));
        assert!(!machine.is_active());
    }

    #[test]
    fn terminal_transitions_need_a_session() {
        let mut machine = RoutineSession::new();
        let now = Instant::now();
        assert_eq!(
            machine.complete(now).unwrap_err(),
            TransitionError::NoActiveSession
        );
        assert_eq!(
            machine.abandon(now).unwrap_err(),
            TransitionError::NoActiveSession
        );
        assert_eq!(
            machine.complete_step("a").unwrap_err(),
            TransitionError::NoActiveSession
        );
    }
}
