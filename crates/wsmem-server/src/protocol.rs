//! Inbound command handling.
//!
//! One JSON command per message, one reply per command. Anything that does
//! not parse to a known command is dropped without a reply. Memory commands
//! execute directly against the attached target; the peer-vocabulary
//! commands (`open_process`/`close_process`) are queued for the worker.

use crate::cache::{CachedBlock, ReadCache, ReadKey};
use crate::jobs::{Job, JobQueue};
use crate::process::TargetProcess;
use std::sync::Arc;
use tracing::{debug, warn};
use wsmem_common::codec;
use wsmem_common::proto::{Command, Reply, MAX_READ_SIZE};
use wsmem_common::Error;

pub struct ProtocolHandler {
    target: Arc<TargetProcess>,
    cache: Arc<ReadCache>,
    queue: Arc<JobQueue>,
}

impl ProtocolHandler {
    pub fn new(target: Arc<TargetProcess>, cache: Arc<ReadCache>, queue: Arc<JobQueue>) -> Self {
        Self {
            target,
            cache,
            queue,
        }
    }

    /// Handle one inbound text message. `None` means no reply is sent.
    pub fn handle(&self, raw: &str) -> Option<String> {
        let command = match Command::parse(raw) {
            Some(command) => command,
            None => {
                debug!(target: "wsmem::protocol", "Dropping unparseable message");
                return None;
            }
        };
        Some(self.dispatch(command).to_json())
    }

    fn dispatch(&self, command: Command) -> Reply {
        match command {
            Command::Attach { process, pid } => self.attach(process, pid),
            Command::Detach => {
                self.target.detach();
                Reply::result("detached")
            }
            Command::Read { address, size } => self.read(address, size),
            Command::Write { address, data } => self.write(address, &data),
            Command::OpenProcess { process } => {
                // Fire-and-forget: the worker owns the actual open.
                self.queue.enqueue(Job::OpenProcess { process });
                Reply::result("queued")
            }
            Command::CloseProcess => {
                self.queue.enqueue(Job::CloseProcess);
                Reply::result("queued")
            }
        }
    }

    fn attach(&self, process: Option<String>, pid: Option<u32>) -> Reply {
        let result = match (pid, process.as_deref()) {
            (Some(pid), _) => self.target.attach_pid(pid),
            (None, Some(name)) if !name.is_empty() => self.target.attach_name(name),
            _ => return Reply::error("missing process or pid"),
        };
        match result {
            Ok(base) => {
                debug!(
                    target: "wsmem::protocol",
                    base = format_args!("{:#x}", base),
                    "Attach succeeded"
                );
                Reply::result("attached")
            }
            Err(e) => {
                warn!(target: "wsmem::protocol", error = %e, "Attach failed");
                Reply::error(e.to_string())
            }
        }
    }

    fn read(&self, address: u64, size: u32) -> Reply {
        if !self.target.is_attached() {
            return Reply::error("not attached");
        }
        if size == 0 || size > MAX_READ_SIZE {
            return Reply::error("invalid size");
        }
        match self.target.read(address, size as usize) {
            Ok(bytes) => {
                let reply = Reply::data(codec::encode(&bytes));
                self.cache.put(
                    ReadKey::new(address, u64::from(size)),
                    CachedBlock { data: bytes },
                );
                reply
            }
            Err(Error::NotAttached) => Reply::error("not attached"),
            Err(e) => {
                warn!(
                    target: "wsmem::protocol",
                    address = format_args!("{:#x}", address),
                    size,
                    error = %e,
                    "Read failed"
                );
                Reply::error("read failed")
            }
        }
    }

    fn write(&self, address: u64, data: &str) -> Reply {
        if !self.target.is_attached() {
            return Reply::error("not attached");
        }
        let bytes = match codec::decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "wsmem::protocol", error = %e, "Rejecting write with bad hex payload");
                return Reply::error("write failed");
            }
        };
        match self.target.write(address, &bytes) {
            Ok(()) => {
                self.cache.invalidate_overlapping(address, bytes.len() as u64);
                Reply::result("write ok")
            }
            Err(Error::NotAttached) => Reply::error("not attached"),
            Err(e) => {
                warn!(
                    target: "wsmem::protocol",
                    address = format_args!("{:#x}", address),
                    error = %e,
                    "Write failed"
                );
                Reply::error("write failed")
            }
        }
    }
}
