//! Execution endpoints for worker jobs.
//!
//! A job turns into a wire command that is sent somewhere: to a remote peer
//! over a WebSocket client connection, or straight into the local process
//! primitives. Both deployments produce the same wire-shaped replies.

use crate::process::TargetProcess;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use wsmem_common::proto::MAX_READ_SIZE;
use wsmem_common::{codec, Error, Result};

/// Where worker jobs are executed.
pub trait CommandEndpoint: Send + Sync {
    /// Send one command and return its reply within `timeout`.
    fn call(&self, command: Value, timeout: Duration) -> Result<Value>;
}

/// Blocking WebSocket client to a peer server.
///
/// The connection is created lazily and dropped on any error, so the next
/// call reconnects.
pub struct WireEndpoint {
    url: String,
    socket: Mutex<Option<WebSocket<MaybeTlsStream<TcpStream>>>>,
}

impl WireEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: Mutex::new(None),
        }
    }

    fn connect(&self) -> Result<WebSocket<MaybeTlsStream<TcpStream>>> {
        let (socket, _response) = tungstenite::connect(self.url.as_str())
            .map_err(|e| Error::Transport(format!("connect {}: {}", self.url, e)))?;
        debug!(target: "wsmem::endpoint", url = %self.url, "Connected to peer");
        Ok(socket)
    }
}

impl CommandEndpoint for WireEndpoint {
    fn call(&self, command: Value, timeout: Duration) -> Result<Value> {
        let mut guard = self.socket.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let socket = match guard.as_mut() {
            Some(socket) => socket,
            None => return Err(Error::Transport("no connection".to_string())),
        };

        // Bound the reply wait through the socket read timeout.
        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            stream
                .set_read_timeout(Some(timeout))
                .map_err(|e| Error::Transport(e.to_string()))?;
        }

        let result = send_and_wait(socket, &command, timeout);
        if result.is_err() {
            // Drop the connection; the next call reconnects.
            *guard = None;
        }
        result
    }
}

fn send_and_wait(
    socket: &mut WebSocket<MaybeTlsStream<TcpStream>>,
    command: &Value,
    timeout: Duration,
) -> Result<Value> {
    socket
        .send(Message::text(command.to_string()))
        .map_err(|e| Error::Transport(format!("send: {}", e)))?;

    let deadline = Instant::now() + timeout;
    loop {
        match socket.read() {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).map_err(Error::from),
            Ok(Message::Close(_)) => {
                return Err(Error::Transport("peer closed the connection".to_string()))
            }
            Ok(_) => {
                // Control frame; keep waiting within the bound.
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(timeout));
                }
            }
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(Error::Timeout(timeout));
            }
            Err(e) => return Err(Error::Transport(format!("recv: {}", e))),
        }
    }
}

/// Executes commands directly against the local target process.
pub struct LocalEndpoint {
    target: Arc<TargetProcess>,
}

impl LocalEndpoint {
    pub fn new(target: Arc<TargetProcess>) -> Self {
        Self { target }
    }
}

impl CommandEndpoint for LocalEndpoint {
    // Local execution is bounded by the OS call itself.
    fn call(&self, command: Value, _timeout: Duration) -> Result<Value> {
        let cmd = command
            .get("cmd")
            .and_then(|value| value.as_str())
            .unwrap_or_default();
        match cmd {
            "open_process" => {
                let name = command
                    .get("process")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default();
                self.target.attach_name(name)?;
                Ok(json!({ "result": "attached" }))
            }
            "close_process" => {
                self.target.detach();
                Ok(json!({ "result": "detached" }))
            }
            "read" => {
                let address = command
                    .get("address")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                let size = command
                    .get("size")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                if size == 0 || size > u64::from(MAX_READ_SIZE) {
                    return Err(Error::InvalidSize(size.min(u64::from(u32::MAX)) as u32));
                }
                let bytes = self.target.read(address, size as usize)?;
                Ok(json!({ "data": codec::encode(&bytes) }))
            }
            "write" => {
                let address = command
                    .get("address")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                let payload = command
                    .get("data")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default();
                let bytes = codec::decode(payload)?;
                self.target.write(address, &bytes)?;
                Ok(json!({ "result": "write ok" }))
            }
            other => Err(Error::Internal(format!("unsupported command: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::mock::MockOpener;

    const BASE: u64 = 0x1000;

    fn attached_endpoint() -> LocalEndpoint {
        let target = Arc::new(TargetProcess::new(Box::new(MockOpener::new(
            BASE,
            vec![0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0],
        ))));
        target.attach_pid(1).unwrap();
        LocalEndpoint::new(target)
    }

    #[test]
    fn test_local_read() {
        let endpoint = attached_endpoint();
        let reply = endpoint
            .call(
                json!({ "cmd": "read", "address": BASE, "size": 4 }),
                Duration::from_millis(100),
            )
            .unwrap();
        assert_eq!(reply["data"], "DEADBEEF");
    }

    #[test]
    fn test_local_read_size_bounds() {
        let endpoint = attached_endpoint();
        for size in [0u64, u64::from(MAX_READ_SIZE) + 1] {
            let result = endpoint.call(
                json!({ "cmd": "read", "address": BASE, "size": size }),
                Duration::from_millis(100),
            );
            assert!(matches!(result, Err(Error::InvalidSize(_))), "size {}", size);
        }
    }

    #[test]
    fn test_local_write_then_read() {
        let endpoint = attached_endpoint();
        let reply = endpoint
            .call(
                json!({ "cmd": "write", "address": BASE + 4, "data": "0102" }),
                Duration::from_millis(100),
            )
            .unwrap();
        assert_eq!(reply["result"], "write ok");

        let reply = endpoint
            .call(
                json!({ "cmd": "read", "address": BASE + 4, "size": 2 }),
                Duration::from_millis(100),
            )
            .unwrap();
        assert_eq!(reply["data"], "0102");
    }

    #[test]
    fn test_local_close_process_detaches() {
        let endpoint = attached_endpoint();
        let reply = endpoint
            .call(json!({ "cmd": "close_process" }), Duration::from_millis(100))
            .unwrap();
        assert_eq!(reply["result"], "detached");

        let result = endpoint.call(
            json!({ "cmd": "read", "address": BASE, "size": 1 }),
            Duration::from_millis(100),
        );
        assert!(matches!(result, Err(Error::NotAttached)));
    }

    #[test]
    fn test_local_unsupported_command() {
        let endpoint = attached_endpoint();
        let result = endpoint.call(json!({ "cmd": "bogus" }), Duration::from_millis(100));
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
