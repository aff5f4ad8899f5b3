//! End-to-end tests for Client and Server over loopback
//!
//! These tests verify:
//! - Connect and disconnect notifications fire exactly once per side
//! - Typed events in both directions, including broadcast
//! - Remote procedure calls, errors and fire-and-forget calls
//! - Server detection, ping and clock synchronization
//! - Traffic totals survive disconnection

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{pump_until, settle};
use parking_lot::Mutex;
use pulsenet::network::{
    ClientConnected, ClientDisconnected, Connected, Disconnected, ServerDetected,
};
use pulsenet::protocol::PacketType;
use pulsenet::{
    Client, Config, NetError, NetworkAddress, NetworkEvent, RemoteError, RemoteProcedure, Server,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Helper Functions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Chat {
    author: String,
    text: String,
}

impl NetworkEvent for Chat {
    const NAME: &'static str = "test::Chat";
}

fn chat(text: &str) -> Chat {
    Chat {
        author: "tester".to_string(),
        text: text.to_string(),
    }
}

struct Add;

impl RemoteProcedure for Add {
    type Argument = (i32, i32);
    type Response = i32;
    const NAME: &'static str = "test::Add";
}

struct Fail;

impl RemoteProcedure for Fail {
    type Argument = ();
    type Response = ();
    const NAME: &'static str = "test::Fail";
}

type Shared<T> = Arc<Mutex<T>>;

fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

fn test_config() -> Config {
    Config::builder()
        .ping_interval_ms(50)
        .connection_timeout_ms(0)
        .build()
        .unwrap()
}

fn setup_server(config: &Config) -> Server {
    Server::with_config(0, config.clone()).unwrap()
}

fn connect(server: &Server, config: &Config) -> Client {
    Client::with_config(&NetworkAddress::LOCALHOST, server.port(), config.clone()).unwrap()
}

/// Pump both sides until `done` holds
fn pump(server: &mut Server, client: &mut Client, mut done: impl FnMut(&Server, &Client) -> bool) -> bool {
    pump_until(|| {
        server.update(10);
        client.update(10);
        done(server, client)
    })
}

/// A server and a client both sides consider connected
fn setup_pair(config: &Config) -> (Server, Client) {
    let mut server = setup_server(config);
    let mut client = connect(&server, config);

    assert!(pump(&mut server, &mut client, |server, _| server.connection_count() == 1));
    (server, client)
}

// =============================================================================
// Connection Lifecycle Tests
// =============================================================================

#[test]
fn test_connect_notifications_fire_once() {
    let config = test_config();
    let mut server = setup_server(&config);
    let mut client = connect(&server, &config);

    let server_side = shared(0);
    let counter = server_side.clone();
    server.on::<ClientConnected, _>(move |_| *counter.lock() += 1);

    let client_side = shared(0);
    let counter = client_side.clone();
    client.on::<Connected, _>(move |_| *counter.lock() += 1);

    assert!(pump(&mut server, &mut client, |_, _| {
        *server_side.lock() == 1 && *client_side.lock() == 1
    }));

    settle(|| {
        server.update(10);
        client.update(10);
    });
    assert_eq!(*server_side.lock(), 1);
    assert_eq!(*client_side.lock(), 1);
    assert!(client.is_connected());
}

#[test]
fn test_client_close_reports_disconnect() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    let server_side = shared(Vec::new());
    let log = server_side.clone();
    server.on::<ClientDisconnected, _>(move |event| {
        log.lock().push(event.connection.lock().total_bytes_received());
    });

    let client_side = shared(0);
    let counter = client_side.clone();
    client.on::<Disconnected, _>(move |_| *counter.lock() += 1);

    client.emit(&chat("bye")).unwrap();
    thread::sleep(Duration::from_millis(10));
    client.close();

    assert_eq!(*client_side.lock(), 1);
    assert!(!client.is_connected());
    assert!(client.connection().is_none());
    assert!(matches!(client.emit(&chat("late")), Err(NetError::NotConnected)));

    assert!(pump(&mut server, &mut client, |_, _| !server_side.lock().is_empty()));
    settle(|| server.update(10));

    let reports = server_side.lock();
    assert_eq!(reports.len(), 1);
    assert!(reports[0] > 0);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(*client_side.lock(), 1);
}

#[test]
fn test_server_shutdown_disconnects_client() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    let disconnected = shared(0);
    let counter = disconnected.clone();
    client.on::<Disconnected, _>(move |_| *counter.lock() += 1);

    let reported = shared(0);
    let counter = reported.clone();
    server.on::<ClientDisconnected, _>(move |_| *counter.lock() += 1);

    server.shutdown();
    assert_eq!(*reported.lock(), 1);
    assert_eq!(server.connection_count(), 0);

    assert!(pump_until(|| {
        client.update(10);
        client.connection().is_none()
    }));
    assert_eq!(*disconnected.lock(), 1);
}

#[test]
fn test_event_listeners_skip_closed_connections() {
    let config = test_config();
    let (mut server, _client) = setup_pair(&config);

    let listeners = server.event_listeners();
    assert_eq!(listeners.len(), 1);

    listeners[0].lock().close();
    assert!(server.event_listeners().is_empty());
    assert_eq!(server.connection_count(), 1);

    server.update(10);
    assert_eq!(server.connection_count(), 0);
}

// =============================================================================
// Event Tests
// =============================================================================

#[test]
fn test_subscribe_requires_registration() {
    let mut server = setup_server(&test_config());

    let result = server.subscribe::<Chat, _>(|_, _| {});
    assert!(matches!(result, Err(NetError::EventNotRegistered("test::Chat"))));

    server.register_event::<Chat>();
    assert!(server.subscribe::<Chat, _>(|_, _| {}).is_ok());
}

#[test]
fn test_event_client_to_server() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    let received = shared(Vec::new());
    let log = received.clone();
    server.register_event::<Chat>();
    server
        .subscribe::<Chat, _>(move |_, message| log.lock().push(message.clone()))
        .unwrap();

    client.emit(&chat("hello")).unwrap();
    client.emit(&chat("world")).unwrap();

    assert!(pump(&mut server, &mut client, |_, _| received.lock().len() == 2));
    assert_eq!(*received.lock(), vec![chat("hello"), chat("world")]);
}

#[test]
fn test_unregistered_event_is_ignored() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    client.emit(&chat("nobody listens")).unwrap();
    settle(|| {
        server.update(10);
        client.update(10);
    });

    assert_eq!(server.connection_count(), 1);
    assert!(client.is_connected());
}

#[test]
fn test_broadcast_reaches_every_client() {
    let config = test_config();
    let mut server = setup_server(&config);
    let mut first = connect(&server, &config);
    let mut second = connect(&server, &config);

    let received = shared(Vec::new());
    for client in [&mut first, &mut second] {
        let log = received.clone();
        client.register_event::<Chat>();
        client
            .subscribe::<Chat, _>(move |_, message| log.lock().push(message.text.clone()))
            .unwrap();
    }

    assert!(pump_until(|| {
        server.update(10);
        server.connection_count() == 2
    }));
    assert_eq!(server.emit(&chat("everyone")), 2);

    assert!(pump_until(|| {
        first.update(10);
        second.update(10);
        received.lock().len() == 2
    }));
    assert_eq!(*received.lock(), vec!["everyone", "everyone"]);
}

#[test]
fn test_reply_from_subscriber() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    server.register_event::<Chat>();
    server
        .subscribe::<Chat, _>(|connection, message| {
            let reply = Chat {
                author: "server".to_string(),
                text: format!("re: {}", message.text),
            };
            connection.lock().emit(&reply).unwrap();
        })
        .unwrap();

    let replies = shared(Vec::new());
    let log = replies.clone();
    client.register_event::<Chat>();
    client
        .subscribe::<Chat, _>(move |_, message| log.lock().push(message.text.clone()))
        .unwrap();

    client.emit(&chat("hello")).unwrap();

    assert!(pump(&mut server, &mut client, |_, _| !replies.lock().is_empty()));
    assert_eq!(*replies.lock(), vec!["re: hello"]);
}

// =============================================================================
// Remote Call Tests
// =============================================================================

#[test]
fn test_remote_call_round_trip() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    server.register_remote_procedure::<Add, _>(|_, (a, b)| Ok(a + b));

    let outcome = shared(None);
    let slot = outcome.clone();
    client
        .invoke::<Add, _>(&(2, 3), move |result| *slot.lock() = Some(result))
        .unwrap();

    assert!(pump(&mut server, &mut client, |_, _| outcome.lock().is_some()));
    assert_eq!(outcome.lock().take().unwrap(), Ok(5));
    assert_eq!(client.connection().unwrap().lock().pending_call_count(), 0);
}

#[test]
fn test_remote_call_error_propagates() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    server.register_remote_procedure::<Fail, _>(|_, ()| Err(RemoteError::new(42, "refused")));

    let outcome = shared(None);
    let slot = outcome.clone();
    client
        .invoke::<Fail, _>(&(), move |result| *slot.lock() = Some(result))
        .unwrap();

    assert!(pump(&mut server, &mut client, |_, _| outcome.lock().is_some()));
    let error = outcome.lock().take().unwrap().unwrap_err();
    assert_eq!(error.code, 42);
    assert_eq!(error.message, "refused");
}

#[test]
fn test_unknown_procedure() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    let outcome = shared(None);
    let slot = outcome.clone();
    client
        .invoke::<Add, _>(&(1, 1), move |result| *slot.lock() = Some(result))
        .unwrap();

    assert!(pump(&mut server, &mut client, |_, _| outcome.lock().is_some()));
    let error = outcome.lock().take().unwrap().unwrap_err();
    assert_eq!(error.code, RemoteError::UNKNOWN_PROCEDURE);
}

#[test]
fn test_invoke_void_runs_without_response() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    let calls = shared(Vec::new());
    let log = calls.clone();
    server.register_remote_procedure::<Add, _>(move |_, (a, b)| {
        log.lock().push(a + b);
        Ok(a + b)
    });

    client.invoke_void::<Add>(&(20, 22)).unwrap();

    assert!(pump(&mut server, &mut client, |_, _| !calls.lock().is_empty()));
    assert_eq!(*calls.lock(), vec![42]);
    assert_eq!(client.connection().unwrap().lock().pending_call_count(), 0);
}

#[test]
fn test_pending_call_fails_on_close() {
    let config = test_config();
    let (_server, mut client) = setup_pair(&config);

    let outcome = shared(None);
    let slot = outcome.clone();
    client
        .invoke::<Add, _>(&(1, 2), move |result| *slot.lock() = Some(result))
        .unwrap();

    client.close();

    let error = outcome.lock().take().unwrap().unwrap_err();
    assert_eq!(error.code, RemoteError::CONNECTION_CLOSED);
}

// =============================================================================
// Built-in Packet Tests
// =============================================================================

#[test]
fn test_detect_servers() {
    let config = Config::builder()
        .server_name("arena")
        .connection_timeout_ms(0)
        .build()
        .unwrap();
    let (mut server, mut client) = setup_pair(&config);

    let detected = shared(None);
    let slot = detected.clone();
    client.on::<ServerDetected, _>(move |event| *slot.lock() = Some(event.clone()));

    client.detect_servers().unwrap();

    assert!(pump(&mut server, &mut client, |_, _| detected.lock().is_some()));
    let event = detected.lock().take().unwrap();
    assert_eq!(event.name, "arena");
    assert_eq!(event.port, server.port());
    assert_eq!(event.address, NetworkAddress::LOCALHOST);
}

#[test]
fn test_ping_measures_round_trip() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    assert!(pump(&mut server, &mut client, |_, client| {
        client
            .connection()
            .is_some_and(|connection| connection.lock().round_trip_time() > 0)
    }));
}

#[test]
fn test_client_follows_server_clock() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    // The server clock runs fifty times faster
    for _ in 0..40 {
        server.update(500);
        client.update(10);
        thread::sleep(Duration::from_millis(2));
    }

    let time = client.connection().unwrap().lock().time();
    assert!(time >= 2000, "client clock at {}", time);
}

#[test]
fn test_traffic_totals_survive_disconnect() {
    let config = test_config();
    let (mut server, mut client) = setup_pair(&config);

    server.register_event::<Chat>();
    let received = shared(0);
    let counter = received.clone();
    server
        .subscribe::<Chat, _>(move |_, _| *counter.lock() += 1)
        .unwrap();

    client.emit(&chat("counted")).unwrap();
    assert!(pump(&mut server, &mut client, |_, _| *received.lock() == 1));

    let before = server.traffic();
    assert!(before.bytes_received[&PacketType::Event] > 0);

    client.close();
    assert!(pump_until(|| {
        server.update(10);
        server.connection_count() == 0
    }));

    let after = server.traffic();
    assert!(after.bytes_received[&PacketType::Event] >= before.bytes_received[&PacketType::Event]);
    assert!(after.total_received() >= before.total_received());
}

// =============================================================================
// Peer Close Ordering Tests
// =============================================================================

#[test]
fn test_data_before_peer_close_is_dispatched_first() {
    use std::io::Write;

    use pulsenet::protocol::{encode_packet, encode_payload, Event};

    let mut server = setup_server(&test_config());
    server.register_event::<Chat>();

    let log = shared(Vec::new());
    let sink = log.clone();
    server.on::<ClientConnected, _>(move |_| sink.lock().push("connected".to_string()));
    let sink = log.clone();
    server
        .subscribe::<Chat, _>(move |_, event| sink.lock().push(event.text.clone()))
        .unwrap();
    let sink = log.clone();
    server.on::<ClientDisconnected, _>(move |_| sink.lock().push("disconnected".to_string()));

    let frame = encode_packet(
        &Event {
            event_id: Chat::event_id(),
            payload: encode_payload(&chat("last words")).unwrap(),
        }
        .into(),
    )
    .unwrap();

    let mut peer = std::net::TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    peer.write_all(&frame).unwrap();
    drop(peer);
    thread::sleep(Duration::from_millis(50));

    assert!(pump_until(|| {
        server.update(10);
        log.lock().iter().any(|entry| entry == "disconnected")
    }));

    assert_eq!(*log.lock(), vec!["connected", "last words", "disconnected"]);
    assert_eq!(server.connection_count(), 0);
}
