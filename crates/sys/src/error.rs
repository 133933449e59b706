//! Error types for the OS facade
//!
//! Every variant keeps the raw OS error code where one exists, so callers
//! can log or branch on the underlying cause.

/// Error type for facade operations
#[derive(Debug, thiserror::Error)]
pub enum OsError {
    /// No process with the requested pid or name exists
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// The OS refused the handle or the operation
    #[error("Access denied (os error {0})")]
    AccessDenied(u32),

    /// A read touched an invalid or partially mapped address
    #[error("Read failed at {address:#x} (os error {code})")]
    ReadFailed { address: u64, code: u32 },

    /// A write touched an invalid or protected address
    #[error("Write failed at {address:#x} (os error {code})")]
    WriteFailed { address: u64, code: u32 },

    /// Changing page protection failed
    #[error("Protection change failed at {address:#x} (os error {code})")]
    ProtectionFailed { address: u64, code: u32 },

    /// The OS could not allocate virtual memory
    #[error("Allocation failed (os error {0})")]
    AllocationFailed(u32),

    /// `free` was handed an address that is not an allocation base
    #[error("Invalid allocation base: {0:#x}")]
    InvalidBase(u64),

    /// Remote thread creation failed
    #[error("Thread creation failed (os error {0})")]
    ThreadFailed(u32),

    /// Waiting on a remote thread exceeded the caller's timeout
    #[error("Wait timed out")]
    WaitTimedOut,

    /// The backend cannot perform this operation on this platform
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// Filesystem-level failure (procfs parsing and the like)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
