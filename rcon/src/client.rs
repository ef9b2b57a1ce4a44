//! Background RCON connection worker
//!
//! [`RconClient`] is a cheap, clonable handle. Instructions (connect, send,
//! disconnect) are queued to a worker task which owns the socket; everything
//! the server says comes back as [`RconEvent`]s on the receiver returned by
//! [`RconClient::spawn`].

use crate::{
    read_packet, Packet, RconError, AUTH_ID, FIRST_COMMAND_ID, SERVERDATA_AUTH_RESPONSE,
    SERVERDATA_RESPONSE_VALUE,
};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle and traffic notifications from the connection worker
#[derive(Debug)]
pub enum RconEvent {
    Authenticated,
    /// The server closed the stream.
    Closed,
    /// Unsolicited packet, or a packet that does not answer a command.
    ServerMessage(String),
    /// Connect, handshake or socket failure. The link is gone afterwards.
    Error(RconError),
    /// Body of the response to the oldest unanswered command.
    Response(String),
}

#[derive(Debug)]
enum Instruction {
    Connect,
    Send(String),
    Disconnect,
}

/// Handle to the connection worker
#[derive(Debug, Clone)]
pub struct RconClient {
    instructions: mpsc::UnboundedSender<Instruction>,
}

impl RconClient {
    /// Spawns the worker for `address` (`host:port`). Nothing is dialed until
    /// [`connect`](Self::connect) is called.
    pub fn spawn(
        address: impl Into<String>,
        password: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<RconEvent>) {
        let (instructions, instruction_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let address = address.into();
        let password = password.into();
        tokio::spawn(async move {
            run_worker(address, password, instruction_rx, event_tx).await;
        });

        (RconClient { instructions }, event_rx)
    }

    /// Dials and authenticates, replacing any existing link.
    pub fn connect(&self) {
        self.instruct(Instruction::Connect);
    }

    pub fn send(&self, command: &str) {
        self.instruct(Instruction::Send(command.to_string()));
    }

    /// Drops the link without emitting [`RconEvent::Closed`].
    pub fn disconnect(&self) {
        self.instruct(Instruction::Disconnect);
    }

    fn instruct(&self, instruction: Instruction) {
        if let Err(e) = self.instructions.send(instruction) {
            error!("RCON worker has stopped, dropping {:?}", e.0);
        }
    }
}

/// An authenticated connection
struct Link {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
    next_id: i32,
}

impl Link {
    async fn send_command(&mut self, command: &str) -> Result<(), RconError> {
        let id = self.next_id;
        self.next_id = if id == i32::MAX {
            FIRST_COMMAND_ID
        } else {
            id + 1
        };

        let data = Packet::command(id, command).encode()?;
        self.writer.write_all(&data).await?;
        Ok(())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn run_worker(
    address: String,
    password: String,
    mut instructions: mpsc::UnboundedReceiver<Instruction>,
    events: mpsc::UnboundedSender<RconEvent>,
) {
    let mut link: Option<Link> = None;

    while let Some(instruction) = instructions.recv().await {
        match instruction {
            Instruction::Connect => {
                link = None;
                info!("Connecting to RCON server at {}", address);

                match open_link(&address, &password, events.clone()).await {
                    Ok(new_link) => {
                        link = Some(new_link);
                        emit(&events, RconEvent::Authenticated);
                    }
                    Err(e) => emit(&events, RconEvent::Error(e)),
                }
            }

            Instruction::Send(command) => {
                let Some(active) = link.as_mut() else {
                    warn!("Not connected, dropping command: {}", command);
                    continue;
                };

                if let Err(e) = active.send_command(&command).await {
                    link = None;
                    emit(&events, RconEvent::Error(e));
                }
            }

            Instruction::Disconnect => {
                if link.take().is_some() {
                    info!("Disconnected from {}", address);
                }
            }
        }
    }

    debug!("RCON worker for {} shutting down", address);
}

async fn open_link(
    address: &str,
    password: &str,
    events: mpsc::UnboundedSender<RconEvent>,
) -> Result<Link, RconError> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
        .await
        .map_err(|_| RconError::ConnectTimeout(address.to_string()))??;
    stream.set_nodelay(true)?;

    timeout(CONNECT_TIMEOUT, authenticate(&mut stream, password))
        .await
        .map_err(|_| RconError::ConnectTimeout(address.to_string()))??;

    let (reader, writer) = stream.into_split();
    let reader = tokio::spawn(forward_packets(reader, events));

    Ok(Link {
        writer,
        reader,
        next_id: FIRST_COMMAND_ID,
    })
}

/// Performs the password handshake on a freshly opened stream.
///
/// Servers send an empty response packet ahead of the auth response; anything
/// that is not the auth response is skipped.
pub async fn authenticate<S>(stream: &mut S, password: &str) -> Result<(), RconError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&Packet::auth(password).encode()?).await?;
    stream.flush().await?;

    loop {
        match read_packet(stream).await? {
            Some(packet) if packet.kind == SERVERDATA_AUTH_RESPONSE => {
                return if packet.id == -1 {
                    Err(RconError::AuthRejected)
                } else {
                    if packet.id != AUTH_ID {
                        debug!("Auth response carries unexpected id {}", packet.id);
                    }
                    Ok(())
                };
            }
            Some(packet) => debug!("Skipping packet during handshake: {:?}", packet),
            None => return Err(RconError::HandshakeClosed),
        }
    }
}

async fn forward_packets(mut reader: OwnedReadHalf, events: mpsc::UnboundedSender<RconEvent>) {
    loop {
        let event = match read_packet(&mut reader).await {
            Ok(Some(packet)) if packet.kind == SERVERDATA_RESPONSE_VALUE && packet.id > 0 => {
                RconEvent::Response(packet.body)
            }
            Ok(Some(packet)) => RconEvent::ServerMessage(packet.body),
            Ok(None) => {
                emit(&events, RconEvent::Closed);
                return;
            }
            Err(e) => {
                emit(&events, RconEvent::Error(e));
                return;
            }
        };

        if events.send(event).is_err() {
            return;
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<RconEvent>, event: RconEvent) {
    if let Err(e) = events.send(event) {
        debug!("No listener for RCON event {:?}", e.0);
    }
}
