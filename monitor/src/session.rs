//! Session manager for one remote console
//!
//! A [`Session`] owns the transport and runs everything on a single task:
//! lifecycle events, poll cycles, command round trips and chat requests are
//! handled one at a time inside [`Session::run`]. Suspension only happens
//! while waiting for an event or a timer, so session state needs no locking;
//! the outside world only ever sees copies published through a
//! [`SessionHandle`].
//!
//! ## Lifecycle
//!
//! `Initializing → Connected ⇄ Disconnected`. A clean close reconnects at
//! once; an error reconnects after an exponential backoff. Authentication
//! triggers one full poll cycle before the session reports `Connected`, so
//! the first snapshot a dashboard sees is already populated.
//!
//! ## Polling
//!
//! Each cycle asks for the player list first. If nobody is online the next
//! cycle is scheduled on the idle interval and the remaining commands are
//! skipped, except on the first cycle after connecting.

use crate::backoff::Backoff;
use crate::channel::CommandChannel;
use crate::config::SessionConfig;
use crate::handle::{SessionHandle, SessionRequest, COMMAND_PREFIX};
use crate::parsers::{
    elapsed_time_from_response, parse_evolution, parse_players, parse_text_value, ElapsedTime,
    Evolution,
};
use crate::presence::{PlayerMap, PresenceTracker};
use crate::storage::PresenceStore;
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::utils::get_timestamp;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

pub const POLL_PLAYERS: &str = "/players";
pub const POLL_TIME: &str = "/time";
pub const POLL_VERSION: &str = "/version";
pub const POLL_EVOLUTION: &str = "/evolution";
pub const POLL_SEED: &str = "/seed";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Initializing,
    Connected,
    Disconnected,
}

/// Everything the dashboard gets to see
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub connection_state: ConnectionState,
    pub version: Option<String>,
    pub elapsed_time: Option<ElapsedTime>,
    pub seed: Option<String>,
    pub evolution: BTreeMap<String, Evolution>,
    pub players: PlayerMap,
    /// `None` until the first players reply has been parsed.
    pub polling_paused: Option<bool>,
}

pub struct Session<T, S> {
    config: SessionConfig,
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    requests: mpsc::UnboundedReceiver<SessionRequest>,
    store: S,
    snapshot_tx: watch::Sender<Snapshot>,

    channel: CommandChannel,
    backoff: Backoff,
    presence: PresenceTracker,

    state: ConnectionState,
    /// Transport is authenticated and may carry commands. Runs ahead of
    /// `state` during the first cycle after authentication.
    link_up: bool,
    version: Option<String>,
    elapsed_time: Option<ElapsedTime>,
    seed: Option<String>,
    evolution: BTreeMap<String, Evolution>,
    polling_paused: Option<bool>,

    poll_at: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl<T, S> Session<T, S>
where
    T: Transport,
    S: PresenceStore,
{
    /// Loads the persisted roster, asks the transport to connect and returns
    /// the session together with a handle for readers.
    pub fn new(
        config: SessionConfig,
        mut transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        store: S,
    ) -> (Self, SessionHandle) {
        let mut presence = PresenceTracker::new();
        match store.load() {
            Ok(Some(stored)) => {
                info!("Loaded {} player records", stored.len());
                presence.merge_persisted(stored);
            }
            Ok(None) => info!("No stored player records, starting fresh"),
            Err(e) => error!("Failed to load player records, starting fresh: {}", e),
        }

        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (request_tx, requests) = mpsc::unbounded_channel();

        transport.connect();

        let session = Session {
            channel: CommandChannel::new(config.command_timeout),
            backoff: Backoff::new(config.backoff_floor, config.backoff_ceiling),
            config,
            transport,
            events,
            requests,
            store,
            snapshot_tx,
            presence,
            state: ConnectionState::Initializing,
            link_up: false,
            version: None,
            elapsed_time: None,
            seed: None,
            evolution: BTreeMap::new(),
            polling_paused: None,
            poll_at: None,
            reconnect_at: None,
        };
        session.publish();

        (session, SessionHandle::new(snapshot_rx, request_tx))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connection_state: self.state,
            version: self.version.clone(),
            elapsed_time: self.elapsed_time.clone(),
            seed: self.seed.clone(),
            evolution: self.evolution.clone(),
            players: self.presence.players().clone(),
            polling_paused: self.polling_paused,
        }
    }

    /// Drives the session until `shutdown` resolves or the transport goes
    /// away, then closes it.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }

                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        error!("Transport event stream ended");
                        break;
                    }
                },

                Some(request) = self.requests.recv() => {
                    self.handle_request(request).await;
                },

                _ = wait_until(self.poll_at) => {
                    self.poll_at = None;
                    self.poll_cycle(false).await;
                },

                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    info!("Reconnecting...");
                    self.transport.connect();
                },
            }
        }

        self.close();
    }

    /// Flushes the roster and drops the connection.
    pub fn close(mut self) {
        if !self.presence.is_empty() {
            self.persist();
        }

        self.transport.disconnect();
        self.link_up = false;
        self.state = ConnectionState::Disconnected;
        self.poll_at = None;
        self.reconnect_at = None;
        self.publish();
        info!("Session closed");
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Authenticated => self.on_authenticated().await,
            TransportEvent::Closed => self.on_closed(),
            TransportEvent::Error(e) => self.on_error(&e),
            TransportEvent::ServerMessage(text) => info!("Server sent: {}", text),
            TransportEvent::Response(text) => {
                debug!("Discarding response nobody asked for: {:?}", text);
            }
        }
        self.publish();
    }

    async fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Chat(message) => {
                if message.starts_with(COMMAND_PREFIX) {
                    warn!("Ignoring command: {}", message);
                    return;
                }
                if self.request(&message).await.is_none() {
                    warn!("Chat message not delivered: {}", message);
                }
            }
        }
    }

    async fn on_authenticated(&mut self) {
        info!("Authenticated!");
        self.link_up = true;
        self.reconnect_at = None;
        self.poll_at = None;
        self.channel.abandon();
        self.backoff.reset();

        self.poll_cycle(true).await;

        // The link may have dropped again during the first cycle.
        if self.link_up {
            self.state = ConnectionState::Connected;
        }
    }

    fn on_closed(&mut self) {
        info!("Socket closed, reconnecting");
        self.drop_link();
        self.reconnect_at = None;
        self.transport.connect();
    }

    fn on_error(&mut self, error: &TransportError) {
        self.drop_link();
        let delay = self.backoff.next_delay();
        error!("Error: {}, retrying in {:?}", error, delay);
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn on_timeout(&mut self, command: &str) {
        warn!(
            "No response to {} within {:?}, dropping connection",
            command, self.config.command_timeout
        );
        self.transport.disconnect();
        self.drop_link();
        let delay = self.backoff.next_delay();
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn drop_link(&mut self) {
        self.link_up = false;
        self.state = ConnectionState::Disconnected;
        self.poll_at = None;
        if let Some(e) = self.channel.abandon() {
            debug!("{}", e);
        }
    }

    /// Sends `command` and waits for its response.
    ///
    /// Returns `None` when the command could not be sent or answered; the
    /// field it was meant to refresh simply keeps its previous value.
    async fn request(&mut self, command: &str) -> Option<String> {
        if !self.link_up {
            debug!("Not connected, not sending command: {}", command);
            return None;
        }

        if let Err(e) = self.channel.begin(command, Instant::now()) {
            debug!("{}, not sending command: {}", e, command);
            return None;
        }

        debug!("Sending command: {}", command);
        self.transport.send(command);
        let deadline = self.channel.deadline()?;

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(TransportEvent::Response(text)) => {
                        if let Some(completed) = self.channel.resolve(text) {
                            debug!("Response to {}: {}", completed.command, completed.response);
                            return Some(completed.response);
                        }
                    }
                    Some(TransportEvent::ServerMessage(text)) => info!("Server sent: {}", text),
                    Some(TransportEvent::Closed) => {
                        self.on_closed();
                        return None;
                    }
                    Some(TransportEvent::Error(e)) => {
                        self.on_error(&e);
                        return None;
                    }
                    Some(TransportEvent::Authenticated) => {
                        warn!("Unexpected authentication while waiting for {}", command);
                    }
                    None => {
                        self.drop_link();
                        return None;
                    }
                },

                _ = sleep_until(deadline) => {
                    if let Some(e) = self.channel.expire() {
                        debug!("{}", e);
                    }
                    self.on_timeout(command);
                    return None;
                }
            }
        }
    }

    /// Runs one poll cycle and schedules the next one.
    pub async fn poll_cycle(&mut self, first_cycle: bool) {
        if !self.link_up {
            return;
        }

        self.poll_players().await;
        if !self.link_up {
            return;
        }

        let paused = self.polling_paused == Some(true);
        let interval = if paused {
            self.config.idle_poll_interval
        } else {
            self.config.active_poll_interval
        };
        self.poll_at = Some(Instant::now() + interval);

        if paused && !first_cycle {
            debug!("Nobody online, next poll in {:?}", interval);
            self.publish();
            return;
        }

        self.poll_time().await;
        self.poll_version().await;
        self.poll_evolution().await;
        self.poll_seed().await;
        self.publish();
    }

    async fn poll_players(&mut self) {
        let Some(text) = self.request(POLL_PLAYERS).await else {
            debug!("Failed to get players");
            return;
        };

        let entries = match parse_players(&text) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to parse players ({}): {:?}", e, text);
                return;
            }
        };

        let update = self.presence.apply(&entries, get_timestamp());
        self.polling_paused = Some(update.polling_paused);

        for name in &update.joined {
            info!("{} joined", name);
        }
        for name in &update.left {
            info!("{} left", name);
        }

        if update.changed {
            info!("{} players online", self.presence.online_count());
            self.persist();
        }
    }

    async fn poll_time(&mut self) {
        let Some(text) = self.request(POLL_TIME).await else {
            return;
        };

        self.elapsed_time = Some(match elapsed_time_from_response(&text) {
            Ok(elapsed) => elapsed,
            Err((raw, e)) => {
                warn!("Failed to parse time: {}", e);
                raw
            }
        });
    }

    async fn poll_version(&mut self) {
        let Some(version) = self.request(POLL_VERSION).await.as_deref().and_then(parse_text_value)
        else {
            return;
        };

        if let Some(previous) = self.version.as_ref().filter(|previous| **previous != version) {
            info!("Version changed: {} -> {}", previous, version);
        }
        self.version = Some(version);
    }

    async fn poll_evolution(&mut self) {
        let Some(text) = self.request(POLL_EVOLUTION).await else {
            debug!("Failed to get evolution");
            return;
        };

        match parse_evolution(&text) {
            Ok(regions) => self.evolution.extend(regions),
            Err(e) => warn!("Failed to parse evolution ({}): {:?}", e, text),
        }
    }

    async fn poll_seed(&mut self) {
        if let Some(seed) = self.request(POLL_SEED).await.as_deref().and_then(parse_text_value) {
            self.seed = Some(seed);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(self.presence.players()) {
            error!("Failed to save player records: {}", e);
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
