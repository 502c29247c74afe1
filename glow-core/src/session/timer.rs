use std::time::Duration;

use glow_common::Countdown;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Seconds left after this tick
    Tick { remaining: u32 },
    Completed,
}

#[derive(Debug, Clone, Copy)]
enum TimerCommand {
    SetActive(bool),
    SetDuration(u32),
    Reset,
}

const TICK: Duration = Duration::from_secs(1);

/// Handle to a running step countdown.
///
/// The task emits `Tick` once per second while active, then `Completed`
/// at zero. It stops when the handle is dropped.
pub struct StepTimer {
    commands: mpsc::UnboundedSender<TimerCommand>,
    task: JoinHandle<()>,
}

impl StepTimer {
    pub fn spawn(duration_secs: u32, active: bool) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_timer(
            Countdown::new(duration_secs, active),
            command_rx,
            event_tx,
        ));
        (Self { commands, task }, events)
    }

    pub fn set_active(&self, active: bool) {
        let _ = self.commands.send(TimerCommand::SetActive(active));
    }

    /// A new duration restarts the countdown from the top.
    pub fn set_duration(&self, duration_secs: u32) {
        let _ = self.commands.send(TimerCommand::SetDuration(duration_secs));
    }

    pub fn reset(&self) {
        let _ = self.commands.send(TimerCommand::Reset);
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_timer(
    mut countdown: Countdown,
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
    events: mpsc::UnboundedSender<TimerEvent>,
) {
    let mut clock = interval_at(Instant::now() + TICK, TICK);
    clock.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                let was_running = countdown.is_running();
                match command {
                    TimerCommand::SetActive(active) => countdown.set_active(active),
                    TimerCommand::SetDuration(secs) => {
                        if countdown.set_duration(secs) {
                            clock.reset();
                        }
                    }
                    TimerCommand::Reset => {
                        countdown.reset();
                        clock.reset();
                    }
                }
                // A fresh start gets a full second before its first tick.
                if countdown.is_running() && !was_running {
                    clock.reset();
                }
            }
            _ = clock.tick(), if countdown.is_running() => {
                let Some(tick) = countdown.tick() else { continue };
                if events.send(TimerEvent::Tick { remaining: tick.remaining }).is_err() {
                    break;
                }
                if tick.completed {
                    debug!("Step timer completed");
                    if events.send(TimerEvent::Completed).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next(events: &mut mpsc::UnboundedReceiver<TimerEvent>) -> TimerEvent {
        events.recv().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_each_second_then_completes() {
        let start = Instant::now();
        let (_timer, mut events) = StepTimer::spawn(3, true);

        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 2 });
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 1 });
        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 0 });
        assert_eq!(next(&mut events).await, TimerEvent::Completed);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_timer_does_not_run() {
        let (timer, mut events) = StepTimer::spawn(2, false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(events.try_recv().is_err());

        timer.set_active(true);
        let start = Instant::now();
        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 1 });
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_holds_remaining_time() {
        let (timer, mut events) = StepTimer::spawn(5, true);
        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 4 });

        timer.set_active(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(events.try_recv().is_err());

        timer.set_active(true);
        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn new_duration_restarts_countdown() {
        let (timer, mut events) = StepTimer::spawn(5, true);
        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 4 });

        timer.set_duration(2);
        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 1 });
        assert_eq!(next(&mut events).await, TimerEvent::Tick { remaining: 0 });
        assert_eq!(next(&mut events).await, TimerEvent::Completed);
    }
}
