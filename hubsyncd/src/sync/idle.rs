use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdleTransition {
    /// The scan just ended a busy streak.
    pub entered_idle: bool,
    /// An idle notification is due now.
    pub notify: bool,
}

#[derive(Debug)]
pub struct IdleMonitor {
    interval: Duration,
    notifications: bool,
    last_busy: Instant,
    last_notified: Option<Instant>,
    idle: bool,
}

impl IdleMonitor {
    pub fn new(interval: Duration, notifications: bool, now: Instant) -> Self {
        Self {
            interval,
            notifications,
            last_busy: now,
            last_notified: None,
            idle: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn observe(&mut self, candidates: usize, now: Instant) -> IdleTransition {
        if candidates > 0 {
            self.mark_busy(now);
            return IdleTransition::default();
        }

        let entered_idle = !self.idle;
        self.idle = true;

        let quiet_long_enough = now.saturating_duration_since(self.last_busy) > self.interval;
        let not_recently_notified = self
            .last_notified
            .is_none_or(|at| now.saturating_duration_since(at) > self.interval);
        let notify = self.notifications && quiet_long_enough && not_recently_notified;
        if notify {
            self.last_notified = Some(now);
        }
        IdleTransition {
            entered_idle,
            notify,
        }
    }

    /// Refreshes the busy timestamp once a busy cycle completes.
    pub fn mark_busy(&mut self, now: Instant) {
        self.idle = false;
        self.last_busy = now;
    }
}
