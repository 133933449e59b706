//! Windows backend
//!
//! The native habitat of this library: the Win32 API exposes every facade
//! operation directly (`ReadProcessMemory`, `VirtualAllocEx`,
//! `CreateRemoteThread`, ...). The handle is opened with the access mask
//! needed for memory operations and closed exactly once on drop.

use std::ffi::c_void;
use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, Process32FirstW, Process32NextW,
    MODULEENTRY32W, PROCESSENTRY32W, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, VirtualProtectEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
    PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS, PAGE_PROTECTION_FLAGS,
    PAGE_READONLY, PAGE_READWRITE,
};
use windows::Win32::System::Threading::{
    CreateRemoteThread, GetCurrentProcess, IsWow64Process, OpenProcess, WaitForSingleObject,
    PROCESS_CREATE_THREAD, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
    PROCESS_VM_WRITE,
};

use crate::error::OsError;
use crate::process::{ModuleInfo, ProcessOs, ThreadToken, WaitOutcome};
use crate::protection::Protection;

/// A target process on Windows
pub struct WindowsProcess {
    handle: HANDLE,
    pid: u32,
}

// SAFETY: the handle is a kernel object reference, valid from any thread
unsafe impl Send for WindowsProcess {}
unsafe impl Sync for WindowsProcess {}

fn last_error() -> u32 {
    unsafe { GetLastError().0 }
}

fn to_page_flags(protection: Protection) -> PAGE_PROTECTION_FLAGS {
    match (
        protection.contains(Protection::READ),
        protection.is_writable(),
        protection.is_executable(),
    ) {
        (_, true, true) => PAGE_EXECUTE_READWRITE,
        (true, false, true) => PAGE_EXECUTE_READ,
        (_, true, false) => PAGE_READWRITE,
        (true, false, false) => PAGE_READONLY,
        (false, false, _) => PAGE_NOACCESS,
    }
}

fn from_page_flags(flags: PAGE_PROTECTION_FLAGS) -> Protection {
    match flags {
        PAGE_EXECUTE_READWRITE => Protection::READ_WRITE_EXECUTE,
        PAGE_EXECUTE_READ => Protection::READ_EXECUTE,
        PAGE_READWRITE => Protection::READ_WRITE,
        PAGE_READONLY => Protection::READ,
        _ => Protection::empty(),
    }
}

impl WindowsProcess {
    /// Open a process by pid with the access rights the facade needs
    pub fn open(pid: u32) -> Result<Self, OsError> {
        let access = PROCESS_QUERY_INFORMATION
            | PROCESS_VM_READ
            | PROCESS_VM_WRITE
            | PROCESS_VM_OPERATION
            | PROCESS_CREATE_THREAD;
        let handle = unsafe { OpenProcess(access, false, pid) }
            .map_err(|_| OsError::AccessDenied(last_error()))?;
        tracing::debug!("Opened process {pid}");
        Ok(Self { handle, pid })
    }
}

impl Drop for WindowsProcess {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

impl ProcessOs for WindowsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_64_bit(&self) -> Result<bool, OsError> {
        // A process is 64-bit iff the host OS is 64-bit and the target is
        // not running under WOW64.
        let mut target_wow64 = windows::Win32::Foundation::BOOL(0);
        unsafe { IsWow64Process(self.handle, &mut target_wow64) }
            .map_err(|_| OsError::AccessDenied(last_error()))?;

        let host_is_64 = if cfg!(target_pointer_width = "64") {
            true
        } else {
            // 32-bit build: the host is 64-bit iff we ourselves run under WOW64
            let mut self_wow64 = windows::Win32::Foundation::BOOL(0);
            unsafe { IsWow64Process(GetCurrentProcess(), &mut self_wow64) }
                .map_err(|_| OsError::AccessDenied(last_error()))?;
            self_wow64.as_bool()
        };

        Ok(host_is_64 && !target_wow64.as_bool())
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>, OsError> {
        let snapshot = unsafe {
            CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, self.pid)
        }
        .map_err(|_| OsError::AccessDenied(last_error()))?;

        let mut modules = Vec::new();
        let mut entry = MODULEENTRY32W {
            dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };

        let mut ok = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
        while ok {
            let name_len = entry
                .szModule
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(entry.szModule.len());
            modules.push(ModuleInfo {
                name: String::from_utf16_lossy(&entry.szModule[..name_len]),
                base: entry.modBaseAddr as u64,
                size: entry.modBaseSize as u64,
            });
            ok = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
        }

        unsafe {
            let _ = CloseHandle(snapshot);
        }
        Ok(modules)
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), OsError> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut read = 0usize;
        unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                Some(&mut read),
            )
        }
        .map_err(|_| OsError::ReadFailed {
            address,
            code: last_error(),
        })?;
        if read != buf.len() {
            return Err(OsError::ReadFailed { address, code: 0 });
        }
        Ok(())
    }

    fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<(), OsError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut written = 0usize;
        unsafe {
            WriteProcessMemory(
                self.handle,
                address as *const c_void,
                bytes.as_ptr() as *const c_void,
                bytes.len(),
                Some(&mut written),
            )
        }
        .map_err(|_| OsError::WriteFailed {
            address,
            code: last_error(),
        })?;
        if written != bytes.len() {
            return Err(OsError::WriteFailed { address, code: 0 });
        }
        Ok(())
    }

    fn set_protection(
        &self,
        address: u64,
        len: usize,
        protection: Protection,
    ) -> Result<Protection, OsError> {
        let mut old = PAGE_PROTECTION_FLAGS(0);
        unsafe {
            VirtualProtectEx(
                self.handle,
                address as *const c_void,
                len,
                to_page_flags(protection),
                &mut old,
            )
        }
        .map_err(|_| OsError::ProtectionFailed {
            address,
            code: last_error(),
        })?;
        Ok(from_page_flags(old))
    }

    fn allocate(&self, near: Option<u64>, size: usize, executable: bool) -> Result<u64, OsError> {
        let protection = if executable {
            PAGE_EXECUTE_READWRITE
        } else {
            PAGE_READWRITE
        };
        let base = unsafe {
            VirtualAllocEx(
                self.handle,
                near.map(|a| a as *const c_void),
                size,
                MEM_COMMIT | MEM_RESERVE,
                protection,
            )
        };
        if base.is_null() {
            return Err(OsError::AllocationFailed(last_error()));
        }
        Ok(base as u64)
    }

    fn free(&self, base: u64) -> Result<(), OsError> {
        unsafe { VirtualFreeEx(self.handle, base as *mut c_void, 0, MEM_RELEASE) }
            .map_err(|_| OsError::InvalidBase(base))
    }

    fn spawn_thread(&self, entry: u64, parameter: u64) -> Result<ThreadToken, OsError> {
        let start: unsafe extern "system" fn(*mut c_void) -> u32 =
            unsafe { std::mem::transmute(entry as usize) };
        let thread = unsafe {
            CreateRemoteThread(
                self.handle,
                None,
                0,
                Some(start),
                Some(parameter as *const c_void),
                0,
                None,
            )
        }
        .map_err(|_| OsError::ThreadFailed(last_error()))?;
        Ok(ThreadToken(thread.0 as u64))
    }

    fn join_thread(&self, thread: ThreadToken, timeout: Duration) -> Result<WaitOutcome, OsError> {
        let handle = HANDLE(thread.0 as *mut c_void);
        let millis = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        let outcome = match unsafe { WaitForSingleObject(handle, millis) } {
            WAIT_OBJECT_0 => Ok(WaitOutcome::Signaled),
            WAIT_TIMEOUT => Ok(WaitOutcome::TimedOut),
            _ => Err(OsError::ThreadFailed(last_error())),
        };
        unsafe {
            let _ = CloseHandle(handle);
        }
        outcome
    }
}

/// Find the lowest pid whose executable name matches `name`
pub fn find_pid_by_name(name: &str) -> Result<u32, OsError> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
        .map_err(|_| OsError::AccessDenied(last_error()))?;

    let mut entry = PROCESSENTRY32W {
        dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    let mut best: Option<u32> = None;

    let mut ok = unsafe { Process32FirstW(snapshot, &mut entry) }.is_ok();
    while ok {
        let name_len = entry
            .szExeFile
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(entry.szExeFile.len());
        let exe = String::from_utf16_lossy(&entry.szExeFile[..name_len]);
        if exe.eq_ignore_ascii_case(name) {
            best = Some(best.map_or(entry.th32ProcessID, |b| b.min(entry.th32ProcessID)));
        }
        ok = unsafe { Process32NextW(snapshot, &mut entry) }.is_ok();
    }

    unsafe {
        let _ = CloseHandle(snapshot);
    }
    best.ok_or_else(|| OsError::ProcessNotFound(name.to_string()))
}
