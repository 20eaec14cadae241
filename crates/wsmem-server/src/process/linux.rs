//! Linux memory primitives over procfs.
//!
//! Reads and writes go through `/proc/<pid>/mem` at the target virtual
//! address; the main module base comes from the first `/proc/<pid>/maps`
//! entry. Access is subject to the usual ptrace scoping rules.

use super::{MemoryAccess, MemoryOpener, OpenedProcess};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use tracing::warn;
use wsmem_common::{Error, Result};

pub struct NativeMemory {
    mem: File,
}

impl MemoryAccess for NativeMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
        self.mem
            .read_at(buf, address)
            .map_err(|e| Error::MemoryAccess {
                address,
                message: e.to_string(),
            })
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<usize> {
        self.mem
            .write_at(data, address)
            .map_err(|e| Error::MemoryAccess {
                address,
                message: e.to_string(),
            })
    }
}

/// Opens targets through procfs.
pub struct NativeOpener;

impl MemoryOpener for NativeOpener {
    fn open(&self, pid: u32) -> Result<OpenedProcess> {
        let path = format!("/proc/{}/mem", pid);
        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::ProcessOpen {
                pid,
                message: format!("{}: {}", path, e),
            })?;

        let base = main_module_base(pid).unwrap_or_else(|| {
            warn!(target: "wsmem::process", pid, "Could not determine module base");
            0
        });

        Ok(OpenedProcess {
            base,
            memory: Box::new(NativeMemory { mem }),
        })
    }
}

/// Base of the first mapping in `/proc/<pid>/maps`.
fn main_module_base(pid: u32) -> Option<u64> {
    let maps = std::fs::read_to_string(format!("/proc/{}/maps", pid)).ok()?;
    let first = maps.lines().next()?;
    let start = first.split('-').next()?;
    u64::from_str_radix(start, 16).ok()
}
