//! The process facade trait
//!
//! [`ProcessOs`] is the single seam between mesmer and the host OS. The
//! higher-level crates never issue a syscall themselves; they go through a
//! boxed implementation of this trait, which keeps the hooking engine
//! testable against the [`mock`](crate::mock) backend.

use std::time::Duration;

use crate::error::OsError;
use crate::protection::Protection;

/// A module loaded into the target process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// File name of the image, e.g. `game.dll` or `libc.so.6`
    pub name: String,
    /// Base address the image is mapped at
    pub base: u64,
    /// Size of the mapping in bytes
    pub size: u64,
}

/// Opaque token for a thread started in the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadToken(pub u64);

/// Result of waiting on a remote thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The thread finished within the timeout
    Signaled,
    /// The timeout elapsed first
    TimedOut,
}

/// Facade over one opened target process.
///
/// Implementations hold whatever handle the platform needs and must close
/// it exactly once, on drop. All operations are synchronous; the only
/// blocking call is [`join_thread`](ProcessOs::join_thread), which honors
/// the caller-supplied timeout.
pub trait ProcessOs: Send + Sync {
    /// Process id of the target
    fn pid(&self) -> u32;

    /// Whether the target runs with a 64-bit address space.
    ///
    /// True iff the host OS is 64-bit and the target is not running under
    /// a 32-bit emulation layer.
    fn is_64_bit(&self) -> Result<bool, OsError>;

    /// Snapshot of the modules currently loaded in the target
    fn modules(&self) -> Result<Vec<ModuleInfo>, OsError>;

    /// Read `buf.len()` bytes starting at `address`
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), OsError>;

    /// Write `bytes` starting at `address`
    fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<(), OsError>;

    /// Change the protection of the pages covering `[address, address+len)`.
    ///
    /// Returns the previous protection so the caller can restore it.
    fn set_protection(
        &self,
        address: u64,
        len: usize,
        protection: Protection,
    ) -> Result<Protection, OsError>;

    /// Allocate `size` bytes of virtual memory in the target.
    ///
    /// `near` is a placement hint; the OS may place the region elsewhere,
    /// and callers that need a bounded placement must verify the returned
    /// base themselves. The region is readable and writable; it is also
    /// executable iff `executable` is set.
    fn allocate(&self, near: Option<u64>, size: usize, executable: bool) -> Result<u64, OsError>;

    /// Free a region previously returned by [`allocate`](ProcessOs::allocate)
    fn free(&self, base: u64) -> Result<(), OsError>;

    /// Start a thread in the target at `entry` with `parameter`
    fn spawn_thread(&self, entry: u64, parameter: u64) -> Result<ThreadToken, OsError>;

    /// Wait for a remote thread, up to `timeout`
    fn join_thread(&self, thread: ThreadToken, timeout: Duration) -> Result<WaitOutcome, OsError>;
}

/// Open a target process by pid using the platform backend
pub fn open_by_pid(pid: u32) -> Result<Box<dyn ProcessOs>, OsError> {
    #[cfg(unix)]
    {
        Ok(Box::new(crate::linux::LinuxProcess::open(pid)?))
    }
    #[cfg(windows)]
    {
        Ok(Box::new(crate::windows_impl::WindowsProcess::open(pid)?))
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Err(OsError::Unsupported("no platform backend"))
    }
}

/// Open a target process by executable name using the platform backend.
///
/// If several processes share the name, the one with the lowest pid wins.
pub fn open_by_name(name: &str) -> Result<Box<dyn ProcessOs>, OsError> {
    #[cfg(unix)]
    {
        let pid = crate::linux::find_pid_by_name(name)?;
        Ok(Box::new(crate::linux::LinuxProcess::open(pid)?))
    }
    #[cfg(windows)]
    {
        let pid = crate::windows_impl::find_pid_by_name(name)?;
        Ok(Box::new(crate::windows_impl::WindowsProcess::open(pid)?))
    }
    #[cfg(not(any(unix, windows)))]
    {
        Err(OsError::ProcessNotFound(name.to_string()))
    }
}
