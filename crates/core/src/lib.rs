//! mesmer - memory manipulation for live processes
//!
//! This crate contains the heart of mesmer: pointer-path expressions, the
//! address-range algebra, the executable-memory allocation manager, the
//! instruction codec adapter and the x86/x64 hook composer, all exposed
//! through the [`ProcessMemory`] attachment.
//!
//! # Re-exports
//!
//! The OS facade crate is re-exported as [`sys`] for convenience:
//! process handles, page protections and the mock backend live there.
//!
//! # Example
//!
//! ```no_run
//! use mesmer_core::{HookOptions, ExecutionMode, PointerPath, ProcessMemory};
//!
//! # fn main() -> Result<(), mesmer_core::MemoryError> {
//! let process = ProcessMemory::attach_by_name("game.exe")?;
//! let path: PointerPath = "\"game.dll\"+1F4680,1C,C".parse()?;
//! let health = process.read_u32(&path)?;
//!
//! let hook = process.hook(
//!     process.evaluate(&path)?,
//!     mesmer_core::InjectedCode::from_hex("90 90")?,
//!     &HookOptions::new(ExecutionMode::InjectedFirst),
//! )?;
//! # Ok(())
//! # }
//! ```

// Re-export the OS facade crate
pub use mesmer_sys as sys;

pub mod alloc;
pub mod codec;
pub mod error;
pub mod hook;
pub mod path;
pub mod patch;
pub mod process;
pub mod range;
pub mod strings;

// Re-export commonly used items
pub use alloc::SubReservation;
pub use codec::{Bitness, IcedCodec, InstructionCodec};
pub use error::{CodePart, MemoryError, MemoryResult, PathError};
pub use hook::{
    CodeEdit, CodeHook, ExecutionMode, HookOptions, HookState, InjectedCode, JumpMode,
    PreservedRegister,
};
pub use patch::CodeChange;
pub use path::{PathParseError, PointerOffset, PointerPath};
pub use process::{PointerTarget, ProcessMemory, ProtectionStrategy};
pub use range::MemoryRange;
pub use strings::{LengthPrefix, StringEncoding, StringSettings};

// Re-export the facade types that appear in public signatures
pub use mesmer_sys::{ModuleInfo, OsError, Protection, WaitOutcome};
