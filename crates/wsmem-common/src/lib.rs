//! Shared types for the wsmem workspace.
//!
//! Wire protocol command/reply types, the hex codec they rely on, the error
//! enum used across all crates, configuration, and the logging bootstrap.

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod proto;

pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
