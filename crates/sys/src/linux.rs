//! Linux backend
//!
//! Reads and writes go through `process_vm_readv`/`process_vm_writev`,
//! which need no ptrace attachment. Module enumeration parses
//! `/proc/<pid>/maps`; the bitness probe reads the ELF class of
//! `/proc/<pid>/exe`.
//!
//! Cross-process protection changes, allocation and thread creation have
//! no plain syscall on Linux (they require ptrace-driven syscall
//! injection), so those operations report [`OsError::Unsupported`].

use std::collections::HashMap;
use std::io::{IoSlice, IoSliceMut};
use std::path::Path;
use std::time::Duration;

use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;

use crate::error::OsError;
use crate::process::{ModuleInfo, ProcessOs, ThreadToken, WaitOutcome};
use crate::protection::Protection;

/// A target process on Linux
pub struct LinuxProcess {
    pid: u32,
}

impl LinuxProcess {
    /// Open a process by pid.
    ///
    /// Fails if `/proc/<pid>` does not exist. Actual read permission is
    /// only checked on first access (the kernel enforces it per syscall).
    pub fn open(pid: u32) -> Result<Self, OsError> {
        if !Path::new(&format!("/proc/{pid}")).exists() {
            return Err(OsError::ProcessNotFound(pid.to_string()));
        }
        tracing::debug!("Opened process {pid} via procfs");
        Ok(Self { pid })
    }

    fn proc_path(&self, leaf: &str) -> String {
        format!("/proc/{}/{}", self.pid, leaf)
    }
}

impl ProcessOs for LinuxProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_64_bit(&self) -> Result<bool, OsError> {
        // ELF ident: byte 4 is EI_CLASS, 1 = 32-bit, 2 = 64-bit
        let image = std::fs::read(self.proc_path("exe"))?;
        match image.get(4) {
            Some(2) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(OsError::Io(std::io::Error::other("not an ELF image"))),
        }
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>, OsError> {
        let maps = std::fs::read_to_string(self.proc_path("maps"))?;
        // Group file-backed mappings by path: base is the lowest start,
        // size spans to the highest end.
        let mut spans: HashMap<String, (u64, u64)> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for line in maps.lines() {
            let mut parts = line.split_whitespace();
            let range = parts.next().unwrap_or("");
            let path = match parts.nth(4) {
                Some(p) if p.starts_with('/') => p.to_string(),
                _ => continue,
            };
            let (start, end) = match range.split_once('-') {
                Some((s, e)) => (
                    u64::from_str_radix(s, 16).unwrap_or(0),
                    u64::from_str_radix(e, 16).unwrap_or(0),
                ),
                None => continue,
            };
            let entry = spans.entry(path.clone()).or_insert_with(|| {
                order.push(path);
                (start, end)
            });
            entry.0 = entry.0.min(start);
            entry.1 = entry.1.max(end);
        }

        Ok(order
            .into_iter()
            .map(|path| {
                let (base, end) = spans[&path];
                let name = Path::new(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or(path);
                ModuleInfo {
                    name,
                    base,
                    size: end - base,
                }
            })
            .collect())
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), OsError> {
        if buf.is_empty() {
            return Ok(());
        }
        let len = buf.len();
        let remote = RemoteIoVec {
            base: address as usize,
            len,
        };
        let read = process_vm_readv(
            Pid::from_raw(self.pid as libc::pid_t),
            &mut [IoSliceMut::new(buf)],
            &[remote],
        )
        .map_err(|errno| OsError::ReadFailed {
            address,
            code: errno as u32,
        })?;
        if read != len {
            return Err(OsError::ReadFailed { address, code: 0 });
        }
        Ok(())
    }

    fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<(), OsError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let remote = RemoteIoVec {
            base: address as usize,
            len: bytes.len(),
        };
        let written = process_vm_writev(
            Pid::from_raw(self.pid as libc::pid_t),
            &[IoSlice::new(bytes)],
            &[remote],
        )
        .map_err(|errno| OsError::WriteFailed {
            address,
            code: errno as u32,
        })?;
        if written != bytes.len() {
            return Err(OsError::WriteFailed { address, code: 0 });
        }
        Ok(())
    }

    fn set_protection(
        &self,
        _address: u64,
        _len: usize,
        _protection: Protection,
    ) -> Result<Protection, OsError> {
        Err(OsError::Unsupported("set_protection (linux cross-process)"))
    }

    fn allocate(&self, _near: Option<u64>, _size: usize, _executable: bool) -> Result<u64, OsError> {
        Err(OsError::Unsupported("allocate (linux cross-process)"))
    }

    fn free(&self, _base: u64) -> Result<(), OsError> {
        Err(OsError::Unsupported("free (linux cross-process)"))
    }

    fn spawn_thread(&self, _entry: u64, _parameter: u64) -> Result<ThreadToken, OsError> {
        Err(OsError::Unsupported("spawn_thread (linux cross-process)"))
    }

    fn join_thread(&self, _thread: ThreadToken, _timeout: Duration) -> Result<WaitOutcome, OsError> {
        Err(OsError::Unsupported("join_thread (linux cross-process)"))
    }
}

/// Find the lowest pid whose `comm` matches `name`.
///
/// Note the kernel truncates `comm` to 15 characters, so long executable
/// names must be passed truncated as well.
pub fn find_pid_by_name(name: &str) -> Result<u32, OsError> {
    let mut best: Option<u32> = None;
    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(comm) = std::fs::read_to_string(format!("/proc/{pid}/comm")) else {
            continue;
        };
        if comm.trim_end() == name {
            best = Some(best.map_or(pid, |b| b.min(pid)));
        }
    }
    best.ok_or_else(|| OsError::ProcessNotFound(name.to_string()))
}
