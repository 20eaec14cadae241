//! wsmem server binary.
//!
//! Wires the components together: read cache, job queue + worker, attached
//! target, protocol handler, and the WebSocket transport server. Runs until
//! interrupted.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use wsmem_common::config::Config;
use wsmem_common::{init_logging, Error, Result};
use wsmem_server::cache::ReadCache;
use wsmem_server::endpoint::{CommandEndpoint, LocalEndpoint, WireEndpoint};
use wsmem_server::jobs::{JobQueue, JobRunner};
use wsmem_server::process::TargetProcess;
use wsmem_server::protocol::ProtocolHandler;
use wsmem_server::server::WsServer;

#[derive(Parser, Debug)]
#[command(name = "wsmem-server")]
#[command(about = "Expose a target process's memory over a local WebSocket")]
#[command(version)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// WebSocket URL of a peer server for the job worker; jobs run against
    /// local process primitives when absent
    #[arg(long)]
    peer: Option<String>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(peer) = args.peer {
        config.server.peer_url = Some(peer);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging);

    let cache = Arc::new(ReadCache::new());
    let queue = Arc::new(JobQueue::new());
    let target = Arc::new(TargetProcess::native());
    let handler = Arc::new(ProtocolHandler::new(
        Arc::clone(&target),
        Arc::clone(&cache),
        Arc::clone(&queue),
    ));

    let endpoint: Arc<dyn CommandEndpoint> = match &config.server.peer_url {
        Some(url) => {
            info!(target: "wsmem", peer = %url, "Worker jobs execute against a peer");
            Arc::new(WireEndpoint::new(url.clone()))
        }
        None => Arc::new(LocalEndpoint::new(Arc::clone(&target))),
    };

    let runner = JobRunner::new(Arc::clone(&queue), endpoint, Arc::clone(&cache));
    if !runner.start() {
        return Err(Error::Internal("worker already running".to_string()));
    }

    let server = WsServer::new(handler, config.server.clone());
    if !server.start() {
        runner.stop();
        return Err(Error::Transport(
            "failed to start the transport server".to_string(),
        ));
    }

    wait_for_shutdown()?;

    info!(target: "wsmem", "Shutting down");
    server.stop();
    runner.stop();
    target.detach();
    Ok(())
}

fn wait_for_shutdown() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("runtime: {}", e)))?;
    runtime.block_on(async {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::Internal(format!("signal: {}", e)))
    })
}
