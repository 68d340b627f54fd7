//! End-to-end tests driving a spawned server over real sockets.

use overwire::client;
use overwire::codec;
use overwire::config::Config;
use overwire::handler::{AckResponder, EchoResponder, Hooks, NoopHooks, Responder, DEFAULT_ACK};
use overwire::runtime::{self, ServerHandle};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn test_config() -> Config {
    Config {
        port: 0, // ephemeral
        poll_interval_ms: 20,
        ..Config::default()
    }
}

fn spawn_server(config: Config, responder: Arc<dyn Responder>) -> ServerHandle {
    runtime::spawn(config, responder, Arc::new(NoopHooks)).expect("server failed to start")
}

#[test]
fn fragmented_message_yields_single_response() {
    let server = spawn_server(test_config(), Arc::new(AckResponder));

    let reply = client::request(server.local_addr(), &["AB", "CDover"]).unwrap();
    assert_eq!(reply, DEFAULT_ACK);

    server.shutdown();
}

#[test]
fn no_response_without_terminator() {
    let server = spawn_server(test_config(), Arc::new(AckResponder));

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.write_all(codec::encode("ABCD").as_bytes()).unwrap();
    stream.flush().unwrap();
    // disconnect before ever sending the terminator
    stream.shutdown(Shutdown::Write).unwrap();

    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut raw = Vec::new();
    let result = stream.read_to_end(&mut raw);
    // the server discards the half-received request: either a clean EOF
    // with zero response bytes or a reset, never a reply
    assert!(result.is_err() || raw.is_empty());

    server.shutdown();
}

#[test]
fn non_ascii_text_round_trips() {
    let server = spawn_server(test_config(), Arc::new(EchoResponder));

    let reply = client::request(
        server.local_addr(),
        &["第1个客户端的请求。", " snow ☃ over"],
    )
    .unwrap();
    assert_eq!(reply, "echo: 第1个客户端的请求。 snow ☃ over");

    server.shutdown();
}

#[test]
fn concurrent_clients_are_isolated() {
    let server = spawn_server(test_config(), Arc::new(EchoResponder));

    let clients = 8;
    let replies = client::concurrent_requests(server.local_addr(), clients);
    assert_eq!(replies.len(), clients);
    for (index, reply) in replies.into_iter().enumerate() {
        let reply = reply.unwrap();
        // each reply correlates to its own client's accumulated message
        assert!(
            reply.contains(&format!("client {index},")),
            "client {index} got someone else's reply: {reply}"
        );
        assert!(reply.ends_with("over"));
    }

    server.shutdown();
}

#[test]
fn server_actively_closes_after_response() {
    let server = spawn_server(test_config(), Arc::new(AckResponder));

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .write_all(codec::encode("hello over").as_bytes())
        .unwrap();
    stream.flush().unwrap();

    // the read loop must end via EOF, not via this timeout
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();
    assert_eq!(codec::decode(&raw).unwrap(), DEFAULT_ACK);

    server.shutdown();
}

#[test]
fn oversized_message_drops_connection() {
    let config = Config {
        max_message_bytes: 16,
        ..test_config()
    };
    let server = spawn_server(config, Arc::new(AckResponder));

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    let long = "x".repeat(64);
    stream.write_all(codec::encode(&long).as_bytes()).unwrap();
    stream.flush().unwrap();

    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut raw = Vec::new();
    let result = stream.read_to_end(&mut raw);
    assert!(result.is_err() || raw.is_empty());

    server.shutdown();
}

#[test]
fn idle_connection_is_reaped() {
    let config = Config {
        idle_timeout_ms: 100,
        ..test_config()
    };
    let server = spawn_server(config, Arc::new(AckResponder));

    // connect and stall without sending the terminator
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.write_all(codec::encode("stalled").as_bytes()).unwrap();
    stream.flush().unwrap();

    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut raw = Vec::new();
    let result = stream.read_to_end(&mut raw);
    assert!(result.is_err() || raw.is_empty());

    server.shutdown();
}

#[test]
fn two_workers_serve_concurrent_requests() {
    let config = Config {
        workers: 2,
        ..test_config()
    };
    let server = spawn_server(config, Arc::new(EchoResponder));

    let replies = client::concurrent_requests(server.local_addr(), 8);
    for reply in replies {
        assert!(reply.unwrap().starts_with("echo: "));
    }

    server.shutdown();
}

#[test]
fn hooks_observe_completed_message() {
    struct Recording {
        messages: Mutex<Vec<(SocketAddr, String)>>,
    }

    impl Hooks for Recording {
        fn on_message(&self, peer: SocketAddr, message: &str) {
            self.messages.lock().unwrap().push((peer, message.to_string()));
        }
    }

    let hooks = Arc::new(Recording {
        messages: Mutex::new(Vec::new()),
    });
    let server = runtime::spawn(test_config(), Arc::new(AckResponder), Arc::clone(&hooks) as Arc<dyn Hooks>)
        .expect("server failed to start");

    client::request(server.local_addr(), &["AB", "CDover"]).unwrap();

    let messages = hooks.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1, "ABCDover");
    drop(messages);

    server.shutdown();
}
