//! End-to-end protocol tests over a live WebSocket connection.
//!
//! Each test wires the full stack (mock target, worker, transport server)
//! on an ephemeral port and drives it with a real WebSocket client.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use wsmem_common::config::ServerConfig;
use wsmem_server::cache::{ReadCache, ReadKey};
use wsmem_server::endpoint::{LocalEndpoint, WireEndpoint};
use wsmem_server::jobs::{Job, JobOutcome, JobQueue, JobRunner};
use wsmem_server::process::mock::MockOpener;
use wsmem_server::process::TargetProcess;
use wsmem_server::protocol::ProtocolHandler;
use wsmem_server::server::WsServer;

const BASE: u64 = 4096;

struct Fixture {
    server: WsServer,
    runner: JobRunner,
    cache: Arc<ReadCache>,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.server.stop();
        self.runner.stop();
    }
}

fn start_fixture(initial: Vec<u8>) -> Fixture {
    let cache = Arc::new(ReadCache::new());
    let queue = Arc::new(JobQueue::new());
    let target = Arc::new(TargetProcess::new(Box::new(MockOpener::new(BASE, initial))));
    let handler = Arc::new(ProtocolHandler::new(
        Arc::clone(&target),
        Arc::clone(&cache),
        Arc::clone(&queue),
    ));
    let runner = JobRunner::new(
        Arc::clone(&queue),
        Arc::new(LocalEndpoint::new(Arc::clone(&target))),
        Arc::clone(&cache),
    );
    assert!(runner.start());

    let config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    let server = WsServer::new(handler, config);
    assert!(server.start());

    Fixture {
        server,
        runner,
        cache,
    }
}

type Client = WebSocket<MaybeTlsStream<TcpStream>>;

fn connect(server: &WsServer) -> Client {
    let addr = server.local_addr().expect("server address");
    let (socket, _response) =
        tungstenite::connect(format!("ws://{}", addr)).expect("client connect");
    socket
}

fn roundtrip(socket: &mut Client, command: &str) -> serde_json::Value {
    socket.send(Message::text(command)).expect("send");
    recv_reply(socket)
}

fn recv_reply(socket: &mut Client) -> serde_json::Value {
    loop {
        match socket.read().expect("read") {
            Message::Text(text) => return serde_json::from_str(&text).expect("reply is json"),
            _ => continue,
        }
    }
}

#[test]
fn test_read_requires_attach() {
    let fx = start_fixture(vec![0u8; 8]);
    let mut socket = connect(&fx.server);

    let reply = roundtrip(&mut socket, r#"{"cmd":"read","address":4096,"size":4}"#);
    assert_eq!(reply["error"], "not attached");
}

#[test]
fn test_attach_read_write_roundtrip() {
    let fx = start_fixture(vec![0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0]);
    let mut socket = connect(&fx.server);

    let reply = roundtrip(&mut socket, r#"{"cmd":"attach","pid":4242}"#);
    assert_eq!(reply["result"], "attached");

    let reply = roundtrip(&mut socket, r#"{"cmd":"read","address":4096,"size":4}"#);
    assert_eq!(reply["data"], "DEADBEEF");
    let key = ReadKey::new(4096, 4);
    assert_eq!(
        fx.cache.get(key).expect("cache entry").data,
        vec![0xDE, 0xAD, 0xBE, 0xEF]
    );

    // The write lands in the target and invalidates the overlapping entry.
    let reply = roundtrip(&mut socket, r#"{"cmd":"write","address":4097,"data":"0102"}"#);
    assert_eq!(reply["result"], "write ok");
    assert!(fx.cache.get(key).is_none());

    let reply = roundtrip(&mut socket, r#"{"cmd":"read","address":4096,"size":4}"#);
    assert_eq!(reply["data"], "DE0102EF");

    let reply = roundtrip(&mut socket, r#"{"cmd":"detach"}"#);
    assert_eq!(reply["result"], "detached");

    let reply = roundtrip(&mut socket, r#"{"cmd":"read","address":4096,"size":4}"#);
    assert_eq!(reply["error"], "not attached");
}

#[test]
fn test_size_bounds_over_the_wire() {
    let fx = start_fixture(vec![0u8; 4096]);
    let mut socket = connect(&fx.server);

    roundtrip(&mut socket, r#"{"cmd":"attach","pid":1}"#);

    let reply = roundtrip(&mut socket, r#"{"cmd":"read","address":4096,"size":0}"#);
    assert_eq!(reply["error"], "invalid size");

    let reply = roundtrip(&mut socket, r#"{"cmd":"read","address":4096,"size":4097}"#);
    assert_eq!(reply["error"], "invalid size");

    let reply = roundtrip(&mut socket, r#"{"cmd":"read","address":4096,"size":4096}"#);
    assert_eq!(reply["data"].as_str().expect("payload").len(), 8192);
}

#[test]
fn test_back_to_back_commands_reply_in_order() {
    let fx = start_fixture(vec![0u8; 8]);
    let mut socket = connect(&fx.server);

    // Two commands before reading any reply; both answers arrive in order.
    socket
        .send(Message::text(r#"{"cmd":"attach","pid":7}"#))
        .expect("send");
    socket
        .send(Message::text(r#"{"cmd":"detach"}"#))
        .expect("send");

    assert_eq!(recv_reply(&mut socket)["result"], "attached");
    assert_eq!(recv_reply(&mut socket)["result"], "detached");
}

#[test]
fn test_malformed_messages_get_no_reply() {
    let fx = start_fixture(vec![0u8; 8]);
    let mut socket = connect(&fx.server);

    socket.send(Message::text("this is not json")).expect("send");
    socket
        .send(Message::text(r#"{"cmd":"nonsense"}"#))
        .expect("send");

    // The next reply on the wire belongs to the first valid command.
    let reply = roundtrip(&mut socket, r#"{"cmd":"detach"}"#);
    assert_eq!(reply["result"], "detached");
}

#[test]
fn test_two_clients_share_one_target() {
    let fx = start_fixture(vec![0xAB, 0, 0, 0]);
    let mut first = connect(&fx.server);
    let mut second = connect(&fx.server);

    assert_eq!(
        roundtrip(&mut first, r#"{"cmd":"attach","pid":1}"#)["result"],
        "attached"
    );
    // The second client sees the same attached state.
    let reply = roundtrip(&mut second, r#"{"cmd":"read","address":4096,"size":1}"#);
    assert_eq!(reply["data"], "AB");

    // And a second attach is rejected, whoever asks.
    let reply = roundtrip(&mut second, r#"{"cmd":"attach","pid":2}"#);
    assert!(reply["error"].as_str().expect("error").contains("already attached"));
}

#[test]
fn test_open_process_command_is_queued() {
    let fx = start_fixture(vec![0u8; 8]);
    let mut socket = connect(&fx.server);

    let reply = roundtrip(
        &mut socket,
        r#"{"cmd":"open_process","process":"wsmem-no-such-process"}"#,
    );
    assert_eq!(reply["result"], "queued");
}

#[test]
fn test_worker_executes_jobs_against_wire_peer() {
    let fx = start_fixture(vec![0xDE, 0xAD, 0xBE, 0xEF]);

    // Attach the peer's target over the wire first.
    let mut socket = connect(&fx.server);
    assert_eq!(
        roundtrip(&mut socket, r#"{"cmd":"attach","pid":1}"#)["result"],
        "attached"
    );

    // A second instance's worker sends its jobs to the peer server.
    let addr = fx.server.local_addr().expect("peer address");
    let cache = Arc::new(ReadCache::new());
    let queue = Arc::new(JobQueue::new());
    let runner = JobRunner::new(
        Arc::clone(&queue),
        Arc::new(WireEndpoint::new(format!("ws://{}", addr))),
        Arc::clone(&cache),
    );
    assert!(runner.start());

    let read = queue.enqueue(Job::Read {
        address: 4096,
        size: 4,
    });
    assert_eq!(read.wait(Duration::from_secs(2)), Some(JobOutcome::Done));
    assert_eq!(
        cache.get(ReadKey::new(4096, 4)).expect("cache entry").data,
        vec![0xDE, 0xAD, 0xBE, 0xEF]
    );

    // An acknowledged write drops the overlapping local entry.
    let write = queue.enqueue(Job::Write {
        address: 4096,
        data: vec![0x01],
    });
    assert_eq!(write.wait(Duration::from_secs(2)), Some(JobOutcome::Done));
    assert!(cache.is_empty());

    runner.stop();
}

#[test]
fn test_server_start_stop_contract() {
    let fx = start_fixture(vec![0u8; 8]);

    // A second start on a running server is refused.
    assert!(!fx.server.start());
    assert!(fx.server.is_running());

    fx.server.stop();
    assert!(!fx.server.is_running());
    assert!(fx.server.local_addr().is_none());

    // A fresh start binds again.
    assert!(fx.server.start());
    let mut socket = connect(&fx.server);
    let reply = roundtrip(&mut socket, r#"{"cmd":"detach"}"#);
    assert_eq!(reply["result"], "detached");
}
