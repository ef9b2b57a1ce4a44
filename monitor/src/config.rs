use std::time::Duration;

/// Poll interval while at least one player is online
pub const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Poll interval while nobody is online
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
pub const BACKOFF_CEILING: Duration = Duration::from_secs(20);
/// How long a command may wait for its response before the link is dropped
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables of a [`Session`](crate::session::Session)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub active_poll_interval: Duration,
    pub idle_poll_interval: Duration,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            active_poll_interval: ACTIVE_POLL_INTERVAL,
            idle_poll_interval: IDLE_POLL_INTERVAL,
            backoff_floor: BACKOFF_FLOOR,
            backoff_ceiling: BACKOFF_CEILING,
            command_timeout: COMMAND_TIMEOUT,
        }
    }
}
