//! # RCON Transport Library
//!
//! Client side of the Source RCON protocol as spoken by Factorio's remote
//! console. The crate covers the packet framing, the password handshake and a
//! background connection worker that turns the TCP stream into lifecycle and
//! response events.
//!
//! ## Framing
//!
//! Every packet is a little-endian `i32` length followed by that many bytes:
//! an `i32` request id, an `i32` packet type, the body and two NUL bytes.
//! The three integers form the [`PacketHeader`], which is encoded with
//! bincode's fixed-width little-endian layout.
//!
//! ## Correlation
//!
//! Commands are answered in order, one response per command. Request ids are
//! assigned by the client but callers are expected to keep at most one command
//! in flight, since a response is only meaningful relative to the command that
//! preceded it.

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

pub mod client;

pub use client::{authenticate, RconClient, RconEvent};

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Id used for the authentication request; the server echoes it on success
/// and answers with `-1` on a wrong password.
pub const AUTH_ID: i32 = 1;
/// First id handed to commands after authentication.
pub const FIRST_COMMAND_ID: i32 = 2;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;
/// Smallest valid length: id + type + two terminating NULs.
pub const MIN_PACKET_LENGTH: i32 = 10;
/// Upper bound on a single packet, guards against garbage length prefixes.
pub const MAX_PACKET_LENGTH: i32 = 1024 * 1024;

/// Errors raised by the transport.
#[derive(Debug, thiserror::Error)]
pub enum RconError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("invalid packet length {0}")]
    InvalidLength(i32),

    #[error("authentication rejected by server")]
    AuthRejected,

    #[error("connection closed during handshake")]
    HandshakeClosed,

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
}

/// Fixed-size part of a packet as it appears on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub length: i32,
    pub id: i32,
    pub kind: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn auth(password: &str) -> Self {
        Self::new(AUTH_ID, SERVERDATA_AUTH, password)
    }

    pub fn command(id: i32, command: &str) -> Self {
        Self::new(id, SERVERDATA_EXECCOMMAND, command)
    }

    /// Serializes the packet including its length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, RconError> {
        let length = i32::try_from(self.body.len())
            .ok()
            .and_then(|len| len.checked_add(MIN_PACKET_LENGTH))
            .filter(|len| *len <= MAX_PACKET_LENGTH)
            .ok_or(RconError::InvalidLength(i32::MAX))?;

        let header = PacketHeader {
            length,
            id: self.id,
            kind: self.kind,
        };

        let mut data = bincode::serialize(&header)?;
        data.extend_from_slice(self.body.as_bytes());
        data.extend_from_slice(&[0, 0]);
        Ok(data)
    }
}

/// Reads one packet from `reader`.
///
/// Returns `Ok(None)` when the stream ends cleanly on a packet boundary. A
/// stream that ends in the middle of a packet is an error.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, RconError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let length: i32 = bincode::deserialize(&prefix)?;
    if !(MIN_PACKET_LENGTH..=MAX_PACKET_LENGTH).contains(&length) {
        return Err(RconError::InvalidLength(length));
    }

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;

    let (id, kind): (i32, i32) = bincode::deserialize(&payload[..8])?;
    let mut body = &payload[8..];
    while let [rest @ .., 0] = body {
        body = rest;
    }

    Ok(Some(Packet {
        id,
        kind,
        body: String::from_utf8_lossy(body).into_owned(),
    }))
}
