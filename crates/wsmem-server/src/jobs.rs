//! Asynchronous job queue and its worker.
//!
//! Producers append jobs; a single worker thread drains them strictly in
//! submission order and executes each to completion against a
//! [`CommandEndpoint`] before dequeuing the next. Every enqueue hands back a
//! single-use [`JobHandle`] carrying the job's outcome; dropping the handle
//! makes the job fire-and-forget.

use crate::cache::{CachedBlock, ReadCache, ReadKey};
use crate::endpoint::CommandEndpoint;
use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wsmem_common::{codec, Error};

/// Reply bounds per job type.
pub const OPEN_PROCESS_TIMEOUT: Duration = Duration::from_millis(1000);
pub const CLOSE_PROCESS_TIMEOUT: Duration = Duration::from_millis(500);
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// A unit of asynchronous work. Immutable once built, consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Read { address: u64, size: u64 },
    Write { address: u64, data: Vec<u8> },
    OpenProcess { process: String },
    CloseProcess,
}

impl Job {
    fn timeout(&self) -> Duration {
        match self {
            Job::Read { .. } => READ_TIMEOUT,
            Job::Write { .. } => WRITE_TIMEOUT,
            Job::OpenProcess { .. } => OPEN_PROCESS_TIMEOUT,
            Job::CloseProcess => CLOSE_PROCESS_TIMEOUT,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Job::Read { .. } => "read",
            Job::Write { .. } => "write",
            Job::OpenProcess { .. } => "open_process",
            Job::CloseProcess => "close_process",
        }
    }
}

/// Terminal state of an executed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    Failed(String),
    TimedOut,
}

/// Single-use completion signal for one enqueued job.
pub struct JobHandle {
    rx: mpsc::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Wait up to `timeout` for the outcome. `None` means the job has not
    /// finished, which includes the worker not running at all.
    pub fn wait(&self, timeout: Duration) -> Option<JobOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }
}

struct Pending {
    job: Job,
    done: mpsc::SyncSender<JobOutcome>,
}

/// FIFO of pending jobs. Unbounded; producers never block beyond the O(1)
/// append under the lock. No priority, no coalescing.
#[derive(Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Pending>>,
    ready: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and wake the worker.
    pub fn enqueue(&self, job: Job) -> JobHandle {
        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut jobs = self.jobs.lock();
            jobs.push_back(Pending { job, done: tx });
        }
        self.ready.notify_one();
        JobHandle { rx }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Block until a job is available or `running` clears. `None` on
    /// shutdown; remaining jobs are left in place (and dropped with the
    /// queue), never drained.
    fn wait_pop(&self, running: &AtomicBool) -> Option<Pending> {
        let mut jobs = self.jobs.lock();
        loop {
            if !running.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(pending) = jobs.pop_front() {
                return Some(pending);
            }
            self.ready.wait(&mut jobs);
        }
    }

    fn wake_all(&self) {
        let _jobs = self.jobs.lock();
        self.ready.notify_all();
    }
}

/// The single worker draining a [`JobQueue`].
pub struct JobRunner {
    queue: Arc<JobQueue>,
    endpoint: Arc<dyn CommandEndpoint>,
    cache: Arc<ReadCache>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl JobRunner {
    pub fn new(
        queue: Arc<JobQueue>,
        endpoint: Arc<dyn CommandEndpoint>,
        cache: Arc<ReadCache>,
    ) -> Self {
        Self {
            queue,
            endpoint,
            cache,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the worker thread. Returns `false` (and does nothing) when a
    /// worker is already running.
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let mut slot = self.thread.lock();
        let queue = Arc::clone(&self.queue);
        let endpoint = Arc::clone(&self.endpoint);
        let cache = Arc::clone(&self.cache);
        let running = Arc::clone(&self.running);

        match thread::Builder::new()
            .name("wsmem-worker".to_string())
            .spawn(move || run_loop(queue, endpoint, cache, running))
        {
            Ok(handle) => {
                *slot = Some(handle);
                info!(target: "wsmem::jobs", "Worker started");
                true
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                error!(target: "wsmem::jobs", error = %e, "Failed to spawn worker");
                false
            }
        }
    }

    /// Stop and join the worker. Pending jobs are dropped, not drained; no
    /// job is dequeued after this returns. A no-op when not running.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.queue.wake_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        info!(target: "wsmem::jobs", "Worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn run_loop(
    queue: Arc<JobQueue>,
    endpoint: Arc<dyn CommandEndpoint>,
    cache: Arc<ReadCache>,
    running: Arc<AtomicBool>,
) {
    while let Some(pending) = queue.wait_pop(&running) {
        debug!(target: "wsmem::jobs", job = pending.job.kind(), "Executing job");
        let outcome = execute(&pending.job, endpoint.as_ref(), &cache);
        // The submitter may have dropped its handle; that is fine.
        let _ = pending.done.try_send(outcome);
    }
    debug!(target: "wsmem::jobs", "Worker loop exited");
}

fn execute(job: &Job, endpoint: &dyn CommandEndpoint, cache: &ReadCache) -> JobOutcome {
    let timeout = job.timeout();
    match job {
        Job::OpenProcess { process } => {
            let command = json!({ "cmd": "open_process", "process": process });
            match endpoint.call(command, timeout) {
                Ok(reply) => match reply_error(&reply) {
                    None => {
                        info!(target: "wsmem::jobs", process = %process, "Opened process");
                        JobOutcome::Done
                    }
                    Some(message) => {
                        warn!(target: "wsmem::jobs", process = %process, error = %message, "Failed to open process");
                        JobOutcome::Failed(message)
                    }
                },
                Err(e) => failure(job, e),
            }
        }
        Job::CloseProcess => {
            let command = json!({ "cmd": "close_process" });
            match endpoint.call(command, timeout) {
                Ok(_) => JobOutcome::Done,
                Err(e) => failure(job, e),
            }
        }
        Job::Read { address, size } => {
            let command = json!({ "cmd": "read", "address": address, "size": size });
            match endpoint.call(command, timeout) {
                Ok(reply) => install_read_reply(&reply, *address, *size, cache),
                Err(e) => failure(job, e),
            }
        }
        Job::Write { address, data } => {
            let command = json!({
                "cmd": "write",
                "address": address,
                "data": codec::encode(data),
            });
            match endpoint.call(command, timeout) {
                Ok(reply) => match reply_error(&reply) {
                    None => {
                        cache.invalidate_overlapping(*address, data.len() as u64);
                        JobOutcome::Done
                    }
                    Some(message) => {
                        warn!(
                            target: "wsmem::jobs",
                            address = format_args!("{:#x}", address),
                            error = %message,
                            "Write rejected"
                        );
                        JobOutcome::Failed(message)
                    }
                },
                Err(e) => failure(job, e),
            }
        }
    }
}

/// Decode a read reply and install it in the cache. A reply whose decoded
/// length does not match the requested size installs nothing.
fn install_read_reply(reply: &Value, address: u64, size: u64, cache: &ReadCache) -> JobOutcome {
    let payload = match reply.get("data").and_then(Value::as_str) {
        Some(payload) => payload,
        None => {
            let message = reply_error(reply).unwrap_or_else(|| "malformed reply".to_string());
            warn!(
                target: "wsmem::jobs",
                address = format_args!("{:#x}", address),
                error = %message,
                "Read rejected"
            );
            return JobOutcome::Failed(message);
        }
    };
    match codec::decode(payload) {
        Ok(bytes) if bytes.len() as u64 == size => {
            cache.put(ReadKey::new(address, size), CachedBlock { data: bytes });
            JobOutcome::Done
        }
        Ok(bytes) => {
            warn!(
                target: "wsmem::jobs",
                address = format_args!("{:#x}", address),
                expected = size,
                decoded = bytes.len(),
                "Read reply length mismatch"
            );
            JobOutcome::Failed("reply length mismatch".to_string())
        }
        Err(e) => {
            warn!(target: "wsmem::jobs", error = %e, "Read reply carried bad hex");
            JobOutcome::Failed(e.to_string())
        }
    }
}

fn reply_error(reply: &Value) -> Option<String> {
    reply
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn failure(job: &Job, err: Error) -> JobOutcome {
    match err {
        Error::Timeout(bound) => {
            warn!(target: "wsmem::jobs", job = job.kind(), bound = ?bound, "Job timed out");
            JobOutcome::TimedOut
        }
        other => {
            warn!(target: "wsmem::jobs", job = job.kind(), error = %other, "Job failed");
            JobOutcome::Failed(other.to_string())
        }
    }
}
