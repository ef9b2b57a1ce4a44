//! Single-slot request register
//!
//! The console protocol answers commands in order without any id the caller
//! can rely on, so a response can only be matched to a command if there is
//! never more than one command outstanding. [`CommandChannel`] holds that one
//! slot: a second command is refused while the first is waiting, and the next
//! response always belongs to the command in the slot.

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("busy waiting for {0:?}")]
    Busy(String),

    #[error("no response to {0:?}")]
    TimedOut(String),

    #[error("connection lost while waiting for {0:?}")]
    LinkLost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    pub command: String,
    pub response: String,
}

#[derive(Debug)]
struct InFlight {
    command: String,
    deadline: Instant,
}

#[derive(Debug)]
pub struct CommandChannel {
    timeout: Duration,
    in_flight: Option<InFlight>,
}

impl CommandChannel {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            in_flight: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Claims the slot for `command`. Fails with [`CommandError::Busy`] if
    /// another command is still waiting; the caller drops the new command.
    pub fn begin(&mut self, command: &str, now: Instant) -> Result<(), CommandError> {
        if let Some(pending) = &self.in_flight {
            return Err(CommandError::Busy(pending.command.clone()));
        }

        self.in_flight = Some(InFlight {
            command: command.to_string(),
            deadline: now + self.timeout,
        });
        Ok(())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|pending| pending.deadline)
    }

    /// Matches a response with the waiting command and frees the slot.
    /// Returns `None` for a response nobody asked for.
    pub fn resolve(&mut self, response: String) -> Option<Completed> {
        self.in_flight.take().map(|pending| Completed {
            command: pending.command,
            response,
        })
    }

    /// Gives up on the waiting command after its deadline passed.
    pub fn expire(&mut self) -> Option<CommandError> {
        self.in_flight
            .take()
            .map(|pending| CommandError::TimedOut(pending.command))
    }

    /// Frees the slot because the connection went away.
    pub fn abandon(&mut self) -> Option<CommandError> {
        self.in_flight
            .take()
            .map(|pending| CommandError::LinkLost(pending.command))
    }
}
