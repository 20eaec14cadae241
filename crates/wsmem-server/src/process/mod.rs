//! Attached-process state and the memory access seams behind it.
//!
//! [`TargetProcess`] is the single point of truth for which process is
//! currently attached. It starts detached, holds at most one target, and is
//! mutated only under its own lock by attach/detach. The raw primitives live
//! behind [`MemoryAccess`]/[`MemoryOpener`] so platforms and tests can swap
//! them out.

pub mod mock;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
pub use self::linux::NativeOpener;
#[cfg(target_os = "windows")]
pub use self::windows::NativeOpener;

use parking_lot::Mutex;
use tracing::info;
use wsmem_common::{Error, Result};

/// Raw memory primitives for one open target.
///
/// Both operations report the number of bytes actually transferred, even
/// when that is short of the request.
pub trait MemoryAccess: Send + Sync {
    /// Read into `buf` starting at the target virtual address.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write `data` starting at the target virtual address.
    fn write(&self, address: u64, data: &[u8]) -> Result<usize>;
}

/// Opens a handle onto a process by id.
pub trait MemoryOpener: Send + Sync {
    fn open(&self, pid: u32) -> Result<OpenedProcess>;
}

/// A freshly opened target: its main module base plus memory primitives.
pub struct OpenedProcess {
    pub base: u64,
    pub memory: Box<dyn MemoryAccess>,
}

struct Attached {
    pid: u32,
    base: u64,
    memory: Box<dyn MemoryAccess>,
}

/// The single active target. Detached until an attach succeeds; every memory
/// operation requires the attached state and fails fast otherwise.
pub struct TargetProcess {
    opener: Box<dyn MemoryOpener>,
    attached: Mutex<Option<Attached>>,
}

impl TargetProcess {
    pub fn new(opener: Box<dyn MemoryOpener>) -> Self {
        Self {
            opener,
            attached: Mutex::new(None),
        }
    }

    /// Target with the platform-default process primitives.
    #[cfg(any(target_os = "windows", target_os = "linux"))]
    pub fn native() -> Self {
        Self::new(Box::new(NativeOpener))
    }

    /// Attach to a process by id. Rejected while already attached; the
    /// existing handle is left untouched. A failed open leaves the state
    /// detached. Returns the target's main module base.
    pub fn attach_pid(&self, pid: u32) -> Result<u64> {
        let mut attached = self.attached.lock();
        if let Some(current) = attached.as_ref() {
            return Err(Error::AlreadyAttached(current.pid));
        }
        let opened = self.opener.open(pid)?;
        let base = opened.base;
        info!(
            target: "wsmem::process",
            pid,
            base = format_args!("{:#x}", base),
            "Attached to process"
        );
        *attached = Some(Attached {
            pid,
            base,
            memory: opened.memory,
        });
        Ok(base)
    }

    /// Attach to a process by executable name (case-insensitive).
    pub fn attach_name(&self, name: &str) -> Result<u64> {
        let pid = resolve_pid(name).ok_or_else(|| Error::ProcessNotFound(name.to_string()))?;
        self.attach_pid(pid)
    }

    /// Drop the current target, closing its handle. Returns whether a target
    /// was actually attached; detaching while detached is a successful no-op.
    pub fn detach(&self) -> bool {
        let mut attached = self.attached.lock();
        match attached.take() {
            Some(target) => {
                info!(target: "wsmem::process", pid = target.pid, "Detached from process");
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.lock().is_some()
    }

    pub fn attached_pid(&self) -> Option<u32> {
        self.attached.lock().as_ref().map(|target| target.pid)
    }

    pub fn base_address(&self) -> Option<u64> {
        self.attached.lock().as_ref().map(|target| target.base)
    }

    /// Read exactly `size` bytes at `address`. A short read is a failure.
    pub fn read(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let attached = self.attached.lock();
        let target = attached.as_ref().ok_or(Error::NotAttached)?;
        let mut buf = vec![0u8; size];
        let transferred = target.memory.read(address, &mut buf)?;
        if transferred != size {
            return Err(Error::MemoryAccess {
                address,
                message: format!("short read: {} of {} bytes", transferred, size),
            });
        }
        Ok(buf)
    }

    /// Write all of `data` at `address`. A short write is a failure.
    pub fn write(&self, address: u64, data: &[u8]) -> Result<()> {
        let attached = self.attached.lock();
        let target = attached.as_ref().ok_or(Error::NotAttached)?;
        let transferred = target.memory.write(address, data)?;
        if transferred != data.len() {
            return Err(Error::MemoryAccess {
                address,
                message: format!("short write: {} of {} bytes", transferred, data.len()),
            });
        }
        Ok(())
    }
}

/// Resolve an executable name to a pid, case-insensitively.
pub fn resolve_pid(name: &str) -> Option<u32> {
    use sysinfo::{ProcessesToUpdate, System};

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    sys.processes().iter().find_map(|(pid, process)| {
        process
            .name()
            .eq_ignore_ascii_case(name)
            .then(|| pid.as_u32())
    })
}
