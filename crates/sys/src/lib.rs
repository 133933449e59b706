//! mesmer OS facade
//!
//! Everything that actually touches the host operating system lives in this
//! crate: opening a process, probing its bitness, enumerating its modules,
//! reading and writing its memory, changing page protections, allocating and
//! freeing virtual memory, and running remote threads.
//!
//! The rest of mesmer only ever talks to the [`ProcessOs`] trait, so the
//! platform backends stay swappable:
//! - [`LinuxProcess`] - `process_vm_readv`/`writev` plus `/proc` parsing
//! - `WindowsProcess` - the full Win32 remote-process API (Windows builds)
//! - [`mock::MockProcess`] - an in-memory image for tests

pub mod error;
pub mod mock;
pub mod process;
pub mod protection;

#[cfg(unix)]
mod linux;
#[cfg(windows)]
mod windows_impl;

pub use error::OsError;
pub use process::{open_by_name, open_by_pid, ModuleInfo, ProcessOs, ThreadToken, WaitOutcome};
pub use protection::Protection;

#[cfg(unix)]
pub use linux::LinuxProcess;
#[cfg(windows)]
pub use windows_impl::WindowsProcess;
