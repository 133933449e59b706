//! Sub-reservation handles

use std::sync::{Arc, Weak};

use crate::error::{MemoryError, MemoryResult};
use crate::process::ProcessInner;

use super::pool::ReservationKey;

/// An owned slice of a parent OS allocation.
///
/// The handle keeps only a weak back-reference to its attachment: holding
/// a reservation does not keep the process open. Dropping the handle does
/// NOT return the bytes - code in the target may still be executing there,
/// which this library cannot rule out - so release is always an explicit
/// [`dispose`](SubReservation::dispose).
#[derive(Debug)]
pub struct SubReservation {
    pub(crate) process: Weak<ProcessInner>,
    pub(crate) parent: u64,
    pub(crate) key: ReservationKey,
    pub(crate) address: u64,
    pub(crate) size: u64,
}

impl SubReservation {
    /// First byte of the reserved region
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    fn inner(&self) -> MemoryResult<Arc<ProcessInner>> {
        self.process.upgrade().ok_or(MemoryError::DetachedProcess)
    }

    /// Return the trailing bytes beyond `new_size` to the parent's free
    /// pool. Shrinking to the current size is a no-op.
    pub fn shrink(&mut self, new_size: usize) -> MemoryResult<()> {
        let inner = self.inner()?;
        let shrunk = inner
            .pool
            .lock()
            .shrink(self.parent, self.key, new_size as u64)?;
        self.size = shrunk.size();
        Ok(())
    }

    /// Give the whole region back to the parent's free pool
    pub fn dispose(self) -> MemoryResult<()> {
        let inner = self.inner()?;
        let result = inner.pool.lock().release(self.parent, self.key);
        result
    }
}
