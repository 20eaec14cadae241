//! WebSocket transport server.
//!
//! One service thread runs a single-threaded async executor: connections are
//! time-sliced, never parallel, and each inbound message is fully handled
//! before the next one on its connection. Replies flow through an ordered
//! per-connection outbound queue. The accept loop polls on a bounded
//! interval so a stop request is observed promptly.

use crate::protocol::ProtocolHandler;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::unbounded_channel;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use wsmem_common::config::ServerConfig;
use wsmem_common::{Error, Result};

pub struct WsServer {
    handler: Arc<ProtocolHandler>,
    config: ServerConfig,
    running: Arc<AtomicBool>,
    bound: Arc<Mutex<Option<SocketAddr>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WsServer {
    pub fn new(handler: Arc<ProtocolHandler>, config: ServerConfig) -> Self {
        Self {
            handler,
            config,
            running: Arc::new(AtomicBool::new(false)),
            bound: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
        }
    }

    /// Bind and spawn the service thread. Returns `false` when the server is
    /// already running or the bind fails.
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let mut slot = self.thread.lock();
        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let handler = Arc::clone(&self.handler);
        let running = Arc::clone(&self.running);
        let bound = Arc::clone(&self.bound);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<SocketAddr>>();

        let spawned = thread::Builder::new()
            .name("wsmem-server".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::Internal(format!("runtime: {}", e))));
                        return;
                    }
                };
                runtime.block_on(serve(addr, poll, handler, running, bound, ready_tx));
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                error!(target: "wsmem::server", error = %e, "Failed to spawn service thread");
                return false;
            }
        };

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(addr)) => {
                *slot = Some(handle);
                info!(target: "wsmem::server", address = %addr, "Server listening");
                true
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                error!(target: "wsmem::server", error = %e, "Failed to start server");
                false
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                error!(target: "wsmem::server", "Timed out waiting for the service thread");
                false
            }
        }
    }

    /// Stop and join the service thread. In-flight connections are torn down
    /// with the executor. A no-op when not running.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        *self.bound.lock() = None;
        info!(target: "wsmem::server", "Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address actually bound, useful with an ephemeral port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

async fn serve(
    addr: String,
    poll: Duration,
    handler: Arc<ProtocolHandler>,
    running: Arc<AtomicBool>,
    bound: Arc<Mutex<Option<SocketAddr>>>,
    ready_tx: mpsc::Sender<Result<SocketAddr>>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = ready_tx.send(Err(Error::Transport(format!("bind {}: {}", addr, e))));
            return;
        }
    };
    let local = match listener.local_addr() {
        Ok(local) => local,
        Err(e) => {
            let _ = ready_tx.send(Err(Error::Transport(format!("local addr: {}", e))));
            return;
        }
    };
    *bound.lock() = Some(local);
    let _ = ready_tx.send(Ok(local));
    drop(ready_tx);

    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(poll, listener.accept()).await {
            // Poll tick: re-check the running flag.
            Err(_) => continue,
            Ok(Ok((stream, peer))) => {
                debug!(target: "wsmem::server", peer = %peer, "Connection accepted");
                let handler = Arc::clone(&handler);
                let running = Arc::clone(&running);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handler, running, poll).await {
                        debug!(target: "wsmem::server", peer = %peer, error = %e, "Connection ended");
                    }
                });
            }
            Ok(Err(e)) => {
                warn!(target: "wsmem::server", error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    info!(target: "wsmem::server", "Service loop exited");
}

async fn handle_connection(
    stream: TcpStream,
    handler: Arc<ProtocolHandler>,
    running: Arc<AtomicBool>,
    poll: Duration,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::Transport(format!("handshake: {}", e)))?;
    let (mut sink, mut source) = ws.split();

    // Ordered outbound queue; the writer drains it in submission order.
    let (reply_tx, mut reply_rx) = unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = reply_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while running.load(Ordering::SeqCst) {
        let message = match tokio::time::timeout(poll, source.next()).await {
            // Poll tick: re-check the running flag.
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(target: "wsmem::server", error = %e, "Receive error");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };
        match message {
            Message::Text(text) => {
                if let Some(reply) = handler.handle(&text) {
                    if reply_tx.send(Message::text(reply)).is_err() {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            // Binary and ping/pong frames are not part of the protocol.
            _ => {}
        }
    }

    writer.abort();
    debug!(target: "wsmem::server", "Connection closed");
    Ok(())
}
