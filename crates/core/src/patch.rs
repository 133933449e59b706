//! Reversible code changes
//!
//! A [`CodeChange`] remembers what a stretch of code looked like before it
//! was overwritten. The current state lives in the target process itself;
//! reverting simply writes the original bytes back.

use std::sync::Weak;

use crate::error::{MemoryError, MemoryResult};
use crate::process::{ProcessInner, ProtectionStrategy};

/// Original bytes at an address, with the means to put them back
#[derive(Debug)]
pub struct CodeChange {
    process: Weak<ProcessInner>,
    address: u64,
    original: Vec<u8>,
    reverted: bool,
}

impl CodeChange {
    pub(crate) fn new(process: Weak<ProcessInner>, address: u64, original: Vec<u8>) -> Self {
        Self {
            process,
            address,
            original,
            reverted: false,
        }
    }

    /// Address of the patched region
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The bytes as they were before the change
    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    pub fn is_reverted(&self) -> bool {
        self.reverted
    }

    /// Write the original bytes back.
    ///
    /// Idempotent: a second call does nothing and succeeds. Fails with
    /// [`MemoryError::DetachedProcess`] once the attachment is gone, or
    /// with a write failure if the page no longer exists.
    pub fn revert(&mut self) -> MemoryResult<()> {
        if self.reverted {
            return Ok(());
        }
        let inner = self
            .process
            .upgrade()
            .ok_or(MemoryError::DetachedProcess)?;
        inner.write_protected(self.address, &self.original, ProtectionStrategy::RemoveAndRestore)?;
        self.reverted = true;
        tracing::info!(
            "Reverted {} bytes at {:#x}",
            self.original.len(),
            self.address
        );
        Ok(())
    }
}
