use std::time::Duration;
use tokio::time::Instant;

/// Drops requests that arrive within `interval` of the last accepted one.
#[derive(Debug, Clone)]
pub(crate) struct SaveThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl SaveThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub(crate) fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
