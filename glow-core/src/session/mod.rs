//! The routine player: session state with background persistence, and the
//! per-step countdown.
mod outbox;
mod service;
mod timer;

pub use outbox::{spawn_outbox_worker, Outbox};
pub use service::{SessionError, SessionService, SessionSummary};
pub use timer::{StepTimer, TimerEvent};
