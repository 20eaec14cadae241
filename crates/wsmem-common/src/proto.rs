//! Wire protocol types.
//!
//! One JSON object per text message, discriminated by a mandatory `cmd`
//! field. A message that fails to parse to a known command is dropped
//! without a reply.

use serde::{Deserialize, Serialize};

/// Hard inclusive ceiling on a single read, bounding per-message buffer
/// allocation. Larger requests are rejected, never chunked.
pub const MAX_READ_SIZE: u32 = 4096;

/// Default listening port of the transport server.
pub const DEFAULT_PORT: u16 = 9001;

/// An inbound command. Missing numeric/payload fields default to zero/empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Attach {
        #[serde(default)]
        process: Option<String>,
        #[serde(default)]
        pid: Option<u32>,
    },
    Detach,
    Read {
        #[serde(default)]
        address: u64,
        #[serde(default)]
        size: u32,
    },
    Write {
        #[serde(default)]
        address: u64,
        #[serde(default)]
        data: String,
    },
    OpenProcess {
        #[serde(default)]
        process: String,
    },
    CloseProcess,
}

impl Command {
    /// Parse one raw inbound message. `None` means the message is dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// An outbound reply: a hex payload, a result string, or an error string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Data { data: String },
    Result { result: String },
    Error { error: String },
}

impl Reply {
    pub fn data(hex: impl Into<String>) -> Self {
        Reply::Data { data: hex.into() }
    }

    pub fn result(message: impl Into<String>) -> Self {
        Reply::Result {
            result: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            error: message.into(),
        }
    }

    /// Serialize for the wire. These flat shapes cannot fail to serialize.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
