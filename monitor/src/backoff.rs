use std::time::Duration;

/// Reconnect delay that doubles on every failure
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            current: floor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Doubles the delay, capped at the ceiling, and returns it.
    pub fn next_delay(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}
