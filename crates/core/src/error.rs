//! Error types for memory operations
//!
//! Failures are returned, never thrown: every fallible boundary in the
//! crate yields one of these variants, and hook operations that allocated
//! memory free it before surfacing the error.

use mesmer_sys::OsError;

use crate::path::PathParseError;

/// Convenience alias used throughout the crate
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Which part of an injected-code assembly failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePart {
    /// The jump from the hook site into the trampoline
    JumpToInjectedCode,
    /// Original instructions re-emitted before the injected body
    PrependedCode,
    /// Original instructions re-emitted after the injected body
    AppendedCode,
    /// The injected body itself
    InjectedCode,
    /// Not attributable to a single part
    Unknown,
}

/// Error type for path evaluation (parse or resolution)
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// The expression string did not parse
    #[error("{0}")]
    Parse(#[from] PathParseError),

    /// The expression names a module the target has not loaded
    #[error("Module not loaded: {0}")]
    ModuleNotFound(String),

    /// A pointer read along the chain returned zero
    #[error("Pointer chain is null at offset index {step}")]
    NullPointer { step: usize },

    /// Adding an offset to a pointer value wrapped around
    #[error("Offset arithmetic overflowed at offset index {step}")]
    OffsetOverflow { step: usize },
}

/// Error type surfaced by all memory, allocation and hooking operations
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Opening or probing the target process failed
    #[error("Attach failed: {0}")]
    AttachFailure(#[source] OsError),

    /// The attachment is gone (explicit detach, drop, or process exit)
    #[error("The target process is detached")]
    DetachedProcess,

    /// A zero address was given where a real target is required
    #[error("The target address is zero")]
    ZeroPointer,

    /// The address does not fit the 32-bit target process
    #[error("Address {0:#x} does not fit a 32-bit address space")]
    IncompatibleBitnessPointer(u64),

    /// A caller-supplied argument was rejected before any work
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Parsing or resolving a pointer path failed
    #[error("Path evaluation failed: {0}")]
    PathEvaluation(#[from] PathError),

    /// The allocation manager could not reserve memory
    #[error("Allocation failed: {0}")]
    AllocationFailure(#[source] OsError),

    /// The decoder could not make sense of the instruction stream
    #[error("Instruction decoding failed: {0}")]
    CodeDecoding(String),

    /// Re-encoding instructions at their new address failed
    #[error("Code assembly failed ({part:?}): {details}")]
    CodeAssembly { part: CodePart, details: String },

    /// An OS-level read failed
    #[error("Read failed: {0}")]
    ReadFailure(#[source] OsError),

    /// An OS-level write failed
    #[error("Write failed: {0}")]
    WriteFailure(#[source] OsError),

    /// Starting or waiting on a remote thread failed
    #[error("Remote thread failed: {0}")]
    ThreadFailure(#[source] OsError),

    /// A textual byte pattern could not be parsed
    #[error("Invalid byte pattern: {0}")]
    InvalidBytePattern(String),
}

impl From<PathParseError> for MemoryError {
    fn from(error: PathParseError) -> Self {
        MemoryError::PathEvaluation(PathError::Parse(error))
    }
}

impl MemoryError {
    /// Shorthand for an assembly failure in a known part
    pub(crate) fn assembly(part: CodePart, details: impl Into<String>) -> Self {
        MemoryError::CodeAssembly {
            part,
            details: details.into(),
        }
    }
}
