//! Error types for wsmem

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not attached")]
    NotAttached,

    #[error("already attached to pid {0}")]
    AlreadyAttached(u32),

    #[error("invalid size: {0}")]
    InvalidSize(u32),

    #[error("process not found: {0}")]
    ProcessNotFound(String),

    #[error("failed to open process {pid}: {message}")]
    ProcessOpen { pid: u32, message: String },

    #[error("memory access error at {address:#x}: {message}")]
    MemoryAccess { address: u64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid hex data: {0}")]
    Hex(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Hex(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_access_error_display() {
        let err = Error::MemoryAccess {
            address: 0x140001000,
            message: "access denied".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("0x140001000"));
        assert!(msg.contains("access denied"));
    }

    #[test]
    fn test_not_attached_display() {
        assert_eq!(Error::NotAttached.to_string(), "not attached");
    }

    #[test]
    fn test_already_attached_display() {
        let msg = Error::AlreadyAttached(1234).to_string();
        assert!(msg.contains("1234"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_hex_error() {
        let hex_err = hex::decode("zz").unwrap_err();
        let err: Error = hex_err.into();
        assert!(matches!(err, Error::Hex(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_ok().unwrap(), 42);
    }
}
