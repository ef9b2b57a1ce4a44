//! Entry points for the dashboard layer

use crate::session::Snapshot;
use log::{info, warn};
use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::{mpsc, watch};

/// Leading character of a console command. Chat text starting with it would
/// be executed by the server instead of broadcast.
pub const COMMAND_PREFIX: char = '/';

pub const ANONYMOUS: &str = "Anonymous";

static GROWTH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-a-zA-Z0-9_ ]+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    #[error("message starts with the command prefix")]
    CommandPrefix,

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("session is no longer running")]
    SessionClosed,
}

/// Work queued for the session by a [`SessionHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Chat(String),
}

/// Clonable access to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    snapshot: watch::Receiver<Snapshot>,
    requests: mpsc::UnboundedSender<SessionRequest>,
}

impl SessionHandle {
    pub(crate) fn new(
        snapshot: watch::Receiver<Snapshot>,
        requests: mpsc::UnboundedSender<SessionRequest>,
    ) -> Self {
        Self { snapshot, requests }
    }

    /// Copy of the latest published state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified whenever the session publishes a new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Queues `message` to be said in game chat.
    pub fn broadcast_chat(&self, message: &str) -> Result<(), BroadcastError> {
        if message.starts_with(COMMAND_PREFIX) {
            warn!("Ignoring command: {}", message);
            return Err(BroadcastError::CommandPrefix);
        }

        self.requests
            .send(SessionRequest::Chat(message.to_string()))
            .map_err(|_| BroadcastError::SessionClosed)
    }

    /// Broadcasts a "The Factory Must Grow!" cheer on behalf of `name`.
    pub fn request_growth(&self, name: Option<&str>) -> Result<(), BroadcastError> {
        let from = name.filter(|name| !name.is_empty()).unwrap_or(ANONYMOUS);

        if !GROWTH_NAME.is_match(from) {
            warn!("Rejecting growth request from invalid name {:?}", from);
            return Err(BroadcastError::InvalidName(from.to_string()));
        }

        info!("Sending growth request from {}", from);
        self.broadcast_chat(&format!("{from}: The Factory Must Grow!"))
    }
}
