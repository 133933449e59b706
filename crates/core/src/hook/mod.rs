//! Code hooking
//!
//! The composer rewrites a live instruction stream so control detours
//! through a trampoline holding injected code, then returns. A successful
//! hook yields a [`CodeHook`]: the site-level [`CodeChange`] plus the
//! trampoline reservation.

mod composer;
mod isolation;
mod options;

pub(crate) use composer::{install_hook, replace_code_at};
pub use options::{ExecutionMode, HookOptions, JumpMode, PreservedRegister};

use crate::alloc::SubReservation;
use crate::error::{MemoryError, MemoryResult};
use crate::patch::CodeChange;

/// Injected code, either raw bytes or an instruction program that is
/// re-encoded at its final address
#[derive(Debug, Clone)]
pub enum InjectedCode {
    /// Position-independent bytes, emitted verbatim
    Bytes(Vec<u8>),
    /// Instructions assembled at the trampoline address, with relative
    /// operands fixed up
    Instructions(Vec<iced_x86::Instruction>),
}

impl InjectedCode {
    /// Parse a whitespace-separated hex byte string, e.g. `"C7 41 38 00"`
    pub fn from_hex(pattern: &str) -> MemoryResult<Self> {
        let mut bytes = Vec::new();
        for part in pattern.split_whitespace() {
            let byte = u8::from_str_radix(part, 16).map_err(|_| {
                MemoryError::InvalidBytePattern(format!("invalid hex byte: {part:?}"))
            })?;
            bytes.push(byte);
        }
        if bytes.is_empty() {
            return Err(MemoryError::InvalidBytePattern(
                "empty byte pattern".to_string(),
            ));
        }
        Ok(InjectedCode::Bytes(bytes))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            InjectedCode::Bytes(bytes) => bytes.is_empty(),
            InjectedCode::Instructions(instructions) => instructions.is_empty(),
        }
    }

    /// Upper bound on the encoded size
    pub(crate) fn max_len(&self) -> usize {
        match self {
            InjectedCode::Bytes(bytes) => bytes.len(),
            InjectedCode::Instructions(instructions) => {
                instructions.len() * crate::codec::MAX_INSTRUCTION_LEN
            }
        }
    }
}

impl From<Vec<u8>> for InjectedCode {
    fn from(bytes: Vec<u8>) -> Self {
        InjectedCode::Bytes(bytes)
    }
}

impl From<&[u8]> for InjectedCode {
    fn from(bytes: &[u8]) -> Self {
        InjectedCode::Bytes(bytes.to_vec())
    }
}

impl From<Vec<iced_x86::Instruction>> for InjectedCode {
    fn from(instructions: Vec<iced_x86::Instruction>) -> Self {
        InjectedCode::Instructions(instructions)
    }
}

/// Lifecycle of a hook site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// Original bytes in place
    Unhooked,
    /// Site jump installed, trampoline live
    Hooked,
    /// Original bytes restored; the trampoline still exists
    Reverted,
}

/// A successful hook: the site change plus its trampoline
#[derive(Debug)]
pub struct CodeHook {
    change: CodeChange,
    trampoline: Option<SubReservation>,
    state: HookState,
}

impl CodeHook {
    pub(crate) fn new(change: CodeChange, trampoline: SubReservation) -> Self {
        Self {
            change,
            trampoline: Some(trampoline),
            state: HookState::Hooked,
        }
    }

    /// Address of the hook site
    pub fn site(&self) -> u64 {
        self.change.address()
    }

    /// Address of the trampoline, while it has not been released
    pub fn trampoline_address(&self) -> Option<u64> {
        self.trampoline.as_ref().map(SubReservation::address)
    }

    pub fn state(&self) -> HookState {
        self.state
    }

    /// The site bytes as they were before hooking
    pub fn original_bytes(&self) -> &[u8] {
        self.change.original_bytes()
    }

    /// Restore the original bytes at the site.
    ///
    /// Idempotent. The trampoline is deliberately NOT released: a thread
    /// of the target could still be executing inside it, and that cannot
    /// be ruled out from here. Call
    /// [`release_trampoline`](CodeHook::release_trampoline) once the
    /// caller knows it is safe.
    pub fn revert(&mut self) -> MemoryResult<()> {
        self.change.revert()?;
        self.state = HookState::Reverted;
        Ok(())
    }

    /// Return the trampoline bytes to the allocation pool.
    ///
    /// Only sound once no thread of the target can still execute there.
    pub fn release_trampoline(&mut self) -> MemoryResult<()> {
        match self.trampoline.take() {
            Some(reservation) => reservation.dispose(),
            None => Ok(()),
        }
    }
}

/// Result of [`replace_code_at`]: a plain overwrite when the replacement
/// fits in place, a full hook when it does not
#[derive(Debug)]
pub enum CodeEdit {
    /// The replacement fit at the site; no trampoline was needed
    Patched(CodeChange),
    /// The replacement went through a `ReplaceOriginal` hook
    Hooked(CodeHook),
}

impl CodeEdit {
    /// Address of the edited site
    pub fn address(&self) -> u64 {
        match self {
            CodeEdit::Patched(change) => change.address(),
            CodeEdit::Hooked(hook) => hook.site(),
        }
    }

    /// Restore the original bytes, whichever form the edit took
    pub fn revert(&mut self) -> MemoryResult<()> {
        match self {
            CodeEdit::Patched(change) => change.revert(),
            CodeEdit::Hooked(hook) => hook.revert(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hex() {
        let code = InjectedCode::from_hex("C7 41 38 13 11 0F 00").unwrap();
        match code {
            InjectedCode::Bytes(bytes) => {
                assert_eq!(bytes, vec![0xC7, 0x41, 0x38, 0x13, 0x11, 0x0F, 0x00]);
            }
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(matches!(
            InjectedCode::from_hex("C7 XX"),
            Err(MemoryError::InvalidBytePattern(_))
        ));
        assert!(matches!(
            InjectedCode::from_hex("   "),
            Err(MemoryError::InvalidBytePattern(_))
        ));
    }

    #[test]
    fn test_max_len() {
        assert_eq!(InjectedCode::from_hex("90 90").unwrap().max_len(), 2);
        let program = InjectedCode::Instructions(vec![iced_x86::Instruction::default(); 3]);
        assert_eq!(program.max_len(), 45);
    }
}
