//! Pure, I/O-free state shared by glow-core and the app shell.
mod countdown;
mod routine_session;

pub use countdown::{Countdown, CountdownTick};
pub use routine_session::{
    ActiveSession, RoutineSession, SessionEvent, SessionOutcome, TransitionError,
};
