//! Pass-through memory callbacks for a host application.
//!
//! The host calls these synchronously and at high frequency. Reads are
//! served from the cache while refresh jobs keep it warm; writes are
//! forwarded as jobs with a bounded wait for the acknowledgement. Both
//! report success plus the number of bytes transferred.

use crate::cache::{ReadCache, ReadKey};
use crate::jobs::{Job, JobHandle, JobOutcome, JobQueue, READ_TIMEOUT, WRITE_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Grace added on top of the per-job reply bound to cover queue wait.
const COMPLETION_GRACE: Duration = Duration::from_millis(50);

pub struct HostBridge {
    cache: Arc<ReadCache>,
    queue: Arc<JobQueue>,
}

impl HostBridge {
    pub fn new(cache: Arc<ReadCache>, queue: Arc<JobQueue>) -> Self {
        Self { cache, queue }
    }

    /// Ask the worker to open the named process on its endpoint.
    pub fn open_process(&self, process: impl Into<String>) -> JobHandle {
        self.queue.enqueue(Job::OpenProcess {
            process: process.into(),
        })
    }

    pub fn close_process(&self) -> JobHandle {
        self.queue.enqueue(Job::CloseProcess)
    }

    /// Fill `buf` from the target. A cache hit is served immediately and
    /// refreshed in the background; a miss waits for the freshly enqueued
    /// read within its bound.
    pub fn read(&self, address: u64, buf: &mut [u8]) -> (bool, usize) {
        if buf.is_empty() {
            return (true, 0);
        }
        let key = ReadKey::new(address, buf.len() as u64);
        let job = Job::Read {
            address,
            size: buf.len() as u64,
        };

        if let Some(block) = self.cache.get(key) {
            trace!(
                target: "wsmem::host",
                address = format_args!("{:#x}", address),
                size = buf.len(),
                "Serving read from cache"
            );
            buf.copy_from_slice(&block.data);
            // Refresh in the background; the handle is dropped on purpose.
            drop(self.queue.enqueue(job));
            return (true, buf.len());
        }

        let handle = self.queue.enqueue(job);
        match handle.wait(READ_TIMEOUT + COMPLETION_GRACE) {
            Some(JobOutcome::Done) => match self.cache.get(key) {
                Some(block) => {
                    buf.copy_from_slice(&block.data);
                    (true, buf.len())
                }
                None => (false, 0),
            },
            _ => (false, 0),
        }
    }

    /// Forward a write and wait for its acknowledgement within the bound.
    pub fn write(&self, address: u64, data: &[u8]) -> (bool, usize) {
        if data.is_empty() {
            return (true, 0);
        }
        let handle = self.queue.enqueue(Job::Write {
            address,
            data: data.to_vec(),
        });
        match handle.wait(WRITE_TIMEOUT + COMPLETION_GRACE) {
            Some(JobOutcome::Done) => (true, data.len()),
            _ => (false, 0),
        }
    }
}
