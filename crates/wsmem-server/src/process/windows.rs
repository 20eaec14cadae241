//! Windows memory primitives over a real process handle.

use super::{MemoryAccess, MemoryOpener, OpenedProcess};
use std::ffi::c_void;
use tracing::warn;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
    PROCESS_VM_WRITE,
};
use wsmem_common::{Error, Result};

/// Owns the process handle; closed on drop.
pub struct NativeMemory {
    handle: HANDLE,
}

impl MemoryAccess for NativeMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
        let mut transferred = 0usize;
        let result = unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                Some(&mut transferred),
            )
        };
        match result {
            Ok(()) => Ok(transferred),
            Err(e) => Err(Error::MemoryAccess {
                address,
                message: e.to_string(),
            }),
        }
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<usize> {
        let mut transferred = 0usize;
        let result = unsafe {
            WriteProcessMemory(
                self.handle,
                address as *const c_void,
                data.as_ptr() as *const c_void,
                data.len(),
                Some(&mut transferred),
            )
        };
        match result {
            Ok(()) => Ok(transferred),
            Err(e) => Err(Error::MemoryAccess {
                address,
                message: e.to_string(),
            }),
        }
    }
}

impl Drop for NativeMemory {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

/// Opens targets with the access rights memory I/O needs.
pub struct NativeOpener;

impl MemoryOpener for NativeOpener {
    fn open(&self, pid: u32) -> Result<OpenedProcess> {
        let handle = unsafe {
            OpenProcess(
                PROCESS_VM_READ
                    | PROCESS_VM_WRITE
                    | PROCESS_VM_OPERATION
                    | PROCESS_QUERY_LIMITED_INFORMATION,
                false,
                pid,
            )
        }
        .map_err(|e| Error::ProcessOpen {
            pid,
            message: e.to_string(),
        })?;

        let base = main_module_base(pid).unwrap_or_else(|| {
            warn!(target: "wsmem::process", pid, "Could not determine module base");
            0
        });

        Ok(OpenedProcess {
            base,
            memory: Box::new(NativeMemory { handle }),
        })
    }
}

/// Base address of the process's main module via a Toolhelp snapshot.
fn main_module_base(pid: u32) -> Option<u64> {
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid).ok()?;

        let mut entry = MODULEENTRY32W {
            dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };

        let base = Module32FirstW(snapshot, &mut entry)
            .ok()
            .map(|_| entry.modBaseAddr as usize as u64);

        let _ = CloseHandle(snapshot);
        base
    }
}
