/// Result of advancing a countdown by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTick {
    pub remaining: u32,
    /// True on the tick that reached zero. Fires once per run.
    pub completed: bool,
}

/// Per-step countdown, advanced once per second by a driver.
///
/// Does not advance while inactive. Changing the duration resets the
/// remaining time to the new full duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    duration: u32,
    remaining: u32,
    active: bool,
}

impl Countdown {
    pub fn new(duration_secs: u32, active: bool) -> Self {
        Self {
            duration: duration_secs,
            remaining: duration_secs,
            active,
        }
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    /// Whether a driver should keep its one-second clock running.
    pub fn is_running(&self) -> bool {
        self.active && self.remaining > 0
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Returns true if the duration changed (and the countdown was reset).
    pub fn set_duration(&mut self, duration_secs: u32) -> bool {
        if duration_secs == self.duration {
            return false;
        }
        self.duration = duration_secs;
        self.remaining = duration_secs;
        true
    }

    pub fn reset(&mut self) {
        self.remaining = self.duration;
    }

    pub fn tick(&mut self) -> Option<CountdownTick> {
        if !self.is_running() {
            return None;
        }
        self.remaining -= 1;
        Some(CountdownTick {
            remaining: self.remaining,
            completed: self.remaining == 0,
        })
    }
}
