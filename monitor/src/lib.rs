//! # Factory Status Monitor
//!
//! Keeps a live picture of a Factorio server by polling its remote console.
//! The library owns the connection lifecycle, the poll schedule, player
//! presence tracking and the parsers for the console's text replies. A web
//! layer sits on top and only ever reads copies of the current state.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Keeps one authenticated console connection alive. A clean close reconnects
//! immediately; a failure waits out an exponential backoff (1s doubling up to
//! 20s) that resets on the next successful authentication.
//!
//! ### Polling
//! Asks for the player list every second while someone is online and every
//! thirty seconds while the server is empty. Game time, version, evolution and
//! map seed are refreshed alongside the player list when players are online,
//! and always on the first cycle after connecting.
//!
//! ### Presence
//! Remembers every player ever seen, when they last joined or left and how
//! long their previous session lasted. The roster is saved whenever it changes
//! and restored at startup.
//!
//! ## Architecture Design
//!
//! ### Single Task
//! A [`session::Session`] runs on one task and handles lifecycle events, timers
//! and commands one at a time. The console answers commands in order without a
//! usable correlation id, so at most one command is ever outstanding; see
//! [`channel::CommandChannel`].
//!
//! ### Snapshots
//! Readers hold a [`handle::SessionHandle`]. Every state change publishes a
//! fresh [`session::Snapshot`] which handles clone on read, so a reader never
//! observes a half-applied update.
//!
//! ## Module Organization
//!
//! - `session`: lifecycle, command round trips and the poll loop
//! - `channel`: the single-slot command register
//! - `presence`: player roster and session durations
//! - `parsers`: pure parsers for console replies
//! - `storage`: roster persistence
//! - `handle`: read access and chat broadcasts for the web layer
//! - `transport`: the seam to the `rcon` crate
//! - `backoff`, `config`, `utils`: supporting pieces
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use monitor::config::SessionConfig;
//! use monitor::session::Session;
//! use monitor::storage::JsonFileStore;
//! use rcon::RconClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (client, events) = RconClient::spawn("localhost:27015", "secret");
//!     let store = JsonFileStore::new(".");
//!
//!     let (session, handle) = Session::new(SessionConfig::default(), client, events, store);
//!     tokio::spawn(session.run(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }));
//!
//!     println!("{:?}", handle.snapshot().connection_state);
//! }
//! ```

pub mod backoff;
pub mod channel;
pub mod config;
pub mod handle;
pub mod parsers;
pub mod presence;
pub mod session;
pub mod storage;
pub mod transport;
pub mod utils;
