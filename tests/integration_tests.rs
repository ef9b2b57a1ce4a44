//! Integration tests for the monitor against a fake RCON server
//!
//! These tests run the real transport over loopback TCP and drive a full
//! session through authentication, polling, reconnects and persistence.

use assert_approx_eq::assert_approx_eq;
use monitor::config::SessionConfig;
use monitor::parsers::ElapsedTime;
use monitor::session::{ConnectionState, Session, Snapshot};
use monitor::storage::{JsonFileStore, PresenceStore};
use rcon::{
    read_packet, Packet, RconClient, RconEvent, AUTH_ID, SERVERDATA_AUTH,
    SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Duration};

const PASSWORD: &str = "hunter2";
const WAIT: Duration = Duration::from_secs(5);

/// Loopback server speaking just enough RCON for the monitor
struct FakeServer {
    address: String,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone)]
struct Behaviour {
    replies: HashMap<String, String>,
    /// Close the first connection after this many commands.
    close_first_after: Option<usize>,
}

impl Behaviour {
    fn factorio(players: &str) -> Self {
        let replies = [
            ("/players", players),
            ("/time", "1 hour, 30 minutes and 0 seconds"),
            ("/version", "1.1.110"),
            (
                "/evolution",
                "Evolution factor: 0.4200. (Time 21%) (Pollution 15%) (Spawner kills 6%)",
            ),
            ("/seed", "1234567890"),
        ]
        .into_iter()
        .map(|(command, reply)| (command.to_string(), reply.to_string()))
        .collect();

        Behaviour {
            replies,
            close_first_after: None,
        }
    }
}

impl FakeServer {
    async fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        {
            let connections = Arc::clone(&connections);
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    let limit = behaviour.close_first_after.filter(|_| index == 0);
                    tokio::spawn(serve(
                        stream,
                        behaviour.replies.clone(),
                        Arc::clone(&received),
                        limit,
                    ));
                }
            });
        }

        FakeServer {
            address,
            connections,
            received,
        }
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

async fn serve(
    mut stream: TcpStream,
    replies: HashMap<String, String>,
    received: Arc<Mutex<Vec<String>>>,
    limit: Option<usize>,
) {
    let Ok(Some(auth)) = read_packet(&mut stream).await else {
        return;
    };
    assert_eq!(auth.kind, SERVERDATA_AUTH);

    let accepted = auth.body == PASSWORD;
    let auth_id = if accepted { auth.id } else { -1 };
    // Real servers send an empty value packet ahead of the auth response.
    write(&mut stream, Packet::new(auth.id, SERVERDATA_RESPONSE_VALUE, "")).await;
    write(&mut stream, Packet::new(auth_id, SERVERDATA_AUTH_RESPONSE, "")).await;
    if !accepted {
        return;
    }

    let mut handled = 0;
    while let Ok(Some(packet)) = read_packet(&mut stream).await {
        assert_eq!(packet.kind, SERVERDATA_EXECCOMMAND);
        received.lock().unwrap().push(packet.body.clone());

        let reply = replies.get(&packet.body).cloned().unwrap_or_default();
        write(&mut stream, Packet::new(packet.id, SERVERDATA_RESPONSE_VALUE, reply)).await;

        handled += 1;
        if limit == Some(handled) {
            return;
        }
    }
}

async fn write(stream: &mut TcpStream, packet: Packet) {
    let _ = stream.write_all(&packet.encode().unwrap()).await;
}

async fn wait_for<F>(handle: &monitor::handle::SessionHandle, mut condition: F) -> Snapshot
where
    F: FnMut(&Snapshot) -> bool,
{
    let mut updates = handle.subscribe();
    timeout(WAIT, async {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            if condition(&snapshot) {
                return snapshot;
            }
            updates.changed().await.unwrap();
        }
    })
    .await
    .expect("session did not reach the expected state")
}

/// TRANSPORT TESTS
mod transport_tests {
    use super::*;

    async fn next_event(events: &mut mpsc::UnboundedReceiver<RconEvent>) -> RconEvent {
        timeout(WAIT, events.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let server = FakeServer::start(Behaviour::factorio("Players (0):")).await;
        let (client, mut events) = RconClient::spawn(server.address.clone(), PASSWORD);

        client.connect();
        assert!(matches!(next_event(&mut events).await, RconEvent::Authenticated));

        client.send("/version");
        match next_event(&mut events).await {
            RconEvent::Response(text) => assert_eq!(text, "1.1.110"),
            other => panic!("expected a response, got {:?}", other),
        }

        client.send("/seed");
        match next_event(&mut events).await {
            RconEvent::Response(text) => assert_eq!(text, "1234567890"),
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_password_is_an_error() {
        let server = FakeServer::start(Behaviour::factorio("Players (0):")).await;
        let (client, mut events) = RconClient::spawn(server.address.clone(), "wrong");

        client.connect();
        assert!(matches!(
            next_event(&mut events).await,
            RconEvent::Error(rcon::RconError::AuthRejected)
        ));
    }

    #[tokio::test]
    async fn test_server_close_is_reported() {
        let mut behaviour = Behaviour::factorio("Players (0):");
        behaviour.close_first_after = Some(1);
        let server = FakeServer::start(behaviour).await;
        let (client, mut events) = RconClient::spawn(server.address.clone(), PASSWORD);

        client.connect();
        assert!(matches!(next_event(&mut events).await, RconEvent::Authenticated));

        client.send("/players");
        assert!(matches!(next_event(&mut events).await, RconEvent::Response(_)));
        assert!(matches!(next_event(&mut events).await, RconEvent::Closed));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Grab a free port and release it so nothing listens there.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (client, mut events) = RconClient::spawn(address, PASSWORD);
        client.connect();
        assert!(matches!(next_event(&mut events).await, RconEvent::Error(_)));
    }

    #[test]
    fn test_auth_packet_layout() {
        let data = Packet::auth(PASSWORD).encode().unwrap();
        assert_eq!(&data[0..4], &(10 + PASSWORD.len() as i32).to_le_bytes());
        assert_eq!(&data[4..8], &AUTH_ID.to_le_bytes());
        assert_eq!(&data[8..12], &SERVERDATA_AUTH.to_le_bytes());
        assert_eq!(&data[12..12 + PASSWORD.len()], PASSWORD.as_bytes());
        assert_eq!(&data[data.len() - 2..], &[0, 0]);
    }
}

/// SESSION TESTS
mod session_tests {
    use super::*;

    fn start_session(
        server: &FakeServer,
        password: &str,
        state_dir: &std::path::Path,
    ) -> (
        monitor::handle::SessionHandle,
        oneshot::Sender<()>,
        tokio::task::JoinHandle<()>,
    ) {
        let (client, events) = RconClient::spawn(server.address.clone(), password);
        let store = JsonFileStore::new(state_dir);
        let (session, handle) = Session::new(SessionConfig::default(), client, events, store);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(session.run(async {
            let _ = stop_rx.await;
        }));
        (handle, stop_tx, task)
    }

    #[tokio::test]
    async fn test_session_reaches_connected_with_full_snapshot() {
        let server = FakeServer::start(Behaviour::factorio(
            "Players (2):\n  Alice (online)\n  Bob\n",
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let (handle, stop, task) = start_session(&server, PASSWORD, dir.path());

        let snapshot = wait_for(&handle, |s| s.connection_state == ConnectionState::Connected).await;

        assert_eq!(snapshot.version.as_deref(), Some("1.1.110"));
        assert_eq!(snapshot.seed.as_deref(), Some("1234567890"));
        match snapshot.elapsed_time {
            Some(ElapsedTime::Parsed(hours)) => assert_approx_eq!(hours, 1.5),
            ref other => panic!("unexpected elapsed time {:?}", other),
        }
        assert_eq!(snapshot.evolution["Nauvis"].factor, 0.42);
        assert_eq!(snapshot.polling_paused, Some(false));
        assert!(snapshot.players["Alice"].online);
        assert!(!snapshot.players["Bob"].online);
        assert_eq!(
            &server.received()[..5],
            &["/players", "/time", "/version", "/evolution", "/seed"]
        );

        stop.send(()).unwrap();
        task.await.unwrap();

        let stored = JsonFileStore::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored["Alice"].last_change.is_some());
        assert_eq!(
            handle.snapshot().connection_state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_snapshot_serializes_for_dashboard() {
        let server = FakeServer::start(Behaviour::factorio("Players (1):\n  Alice (online)\n")).await;
        let dir = tempfile::tempdir().unwrap();
        let (handle, stop, task) = start_session(&server, PASSWORD, dir.path());

        let snapshot = wait_for(&handle, |s| s.connection_state == ConnectionState::Connected).await;
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["connectionState"], "connected");
        assert_eq!(json["pollingPaused"], false);
        assert_eq!(json["elapsedTime"]["kind"], "parsed");
        assert_eq!(json["players"]["Alice"]["online"], true);

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_password_leaves_session_disconnected() {
        let server = FakeServer::start(Behaviour::factorio("Players (0):")).await;
        let dir = tempfile::tempdir().unwrap();
        let (handle, stop, task) = start_session(&server, "wrong", dir.path());

        let snapshot =
            wait_for(&handle, |s| s.connection_state == ConnectionState::Disconnected).await;
        assert_eq!(snapshot.version, None);
        assert!(server.received().is_empty());

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_reconnects_after_server_close() {
        let mut behaviour = Behaviour::factorio("Players (1):\n  Alice\n");
        behaviour.close_first_after = Some(5);
        let server = FakeServer::start(behaviour).await;
        let dir = tempfile::tempdir().unwrap();
        let (handle, stop, task) = start_session(&server, PASSWORD, dir.path());

        timeout(WAIT, async {
            while server.connections.load(Ordering::SeqCst) < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session did not reconnect");

        wait_for(&handle, |s| s.connection_state == ConnectionState::Connected).await;
        let players_polls = server
            .received()
            .iter()
            .filter(|command| command.as_str() == "/players")
            .count();
        assert!(players_polls >= 2);

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_reaches_server() {
        let server = FakeServer::start(Behaviour::factorio("Players (0):")).await;
        let dir = tempfile::tempdir().unwrap();
        let (handle, stop, task) = start_session(&server, PASSWORD, dir.path());

        wait_for(&handle, |s| s.connection_state == ConnectionState::Connected).await;
        handle.request_growth(Some("Belt Weaver")).unwrap();

        timeout(WAIT, async {
            while !server
                .received()
                .contains(&"Belt Weaver: The Factory Must Grow!".to_string())
            {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("chat message never arrived");

        assert!(handle.broadcast_chat("/c game.print('no')").is_err());

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_roster_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let server = FakeServer::start(Behaviour::factorio("Players (1):\n  Alice (online)\n")).await;
        let (handle, stop, task) = start_session(&server, PASSWORD, dir.path());
        wait_for(&handle, |s| s.connection_state == ConnectionState::Connected).await;
        stop.send(()).unwrap();
        task.await.unwrap();

        // Second run cannot authenticate, so the roster can only come from disk.
        let (handle, stop, task) = start_session(&server, "wrong", dir.path());
        let snapshot = handle.snapshot();
        assert!(snapshot.players["Alice"].online);
        assert!(snapshot.players["Alice"].last_change.is_some());

        stop.send(()).unwrap();
        task.await.unwrap();
    }
}
