//! Remote process memory over a local WebSocket.
//!
//! A client sends JSON commands (attach, detach, read, write) and receives
//! JSON replies. Inbound commands execute directly against the attached
//! target process; the host bridge feeds a single-worker job queue whose
//! read results land in the shared read cache.

pub mod cache;
pub mod endpoint;
pub mod host;
pub mod jobs;
pub mod process;
pub mod protocol;
pub mod server;
