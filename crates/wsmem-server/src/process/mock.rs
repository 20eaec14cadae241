//! In-memory target used by tests and loopback demos.

use super::{MemoryAccess, MemoryOpener, OpenedProcess};
use parking_lot::RwLock;
use std::sync::Arc;
use wsmem_common::{Error, Result};

/// A block of fake process memory starting at a fixed base address.
///
/// Reads past the end of the block transfer whatever is available, so short
/// transfers can be exercised; addresses below the base fail outright.
pub struct MockMemory {
    base: u64,
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl MockMemory {
    fn offset(&self, address: u64) -> Result<usize> {
        address
            .checked_sub(self.base)
            .map(|offset| offset as usize)
            .ok_or(Error::MemoryAccess {
                address,
                message: "address below mapped base".to_string(),
            })
    }
}

impl MemoryAccess for MockMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = self.offset(address)?;
        let bytes = self.bytes.read();
        if offset >= bytes.len() {
            return Err(Error::MemoryAccess {
                address,
                message: "address beyond mapped range".to_string(),
            });
        }
        let available = bytes.len() - offset;
        let transferred = buf.len().min(available);
        buf[..transferred].copy_from_slice(&bytes[offset..offset + transferred]);
        Ok(transferred)
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<usize> {
        let offset = self.offset(address)?;
        let mut bytes = self.bytes.write();
        if offset >= bytes.len() {
            return Err(Error::MemoryAccess {
                address,
                message: "address beyond mapped range".to_string(),
            });
        }
        let available = bytes.len() - offset;
        let transferred = data.len().min(available);
        bytes[offset..offset + transferred].copy_from_slice(&data[..transferred]);
        Ok(transferred)
    }
}

/// Opener handing out views onto one shared buffer, whatever the pid.
pub struct MockOpener {
    base: u64,
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl MockOpener {
    pub fn new(base: u64, initial: Vec<u8>) -> Self {
        Self {
            base,
            bytes: Arc::new(RwLock::new(initial)),
        }
    }

    /// A snapshot of the backing bytes, for assertions.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl MemoryOpener for MockOpener {
    fn open(&self, _pid: u32) -> Result<OpenedProcess> {
        Ok(OpenedProcess {
            base: self.base,
            memory: Box::new(MockMemory {
                base: self.base,
                bytes: Arc::clone(&self.bytes),
            }),
        })
    }
}
