//! In-memory mock backend
//!
//! [`MockProcess`] simulates a target process as a set of mapped regions
//! with protections plus an allocation arena. It is what lets the hook
//! composer and allocation manager be exercised byte-for-byte in tests
//! without a live victim process.
//!
//! The mock is cheaply cloneable; every clone shares the same image, so a
//! test can keep one handle for inspection while the attachment owns
//! another.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::OsError;
use crate::process::{ModuleInfo, ProcessOs, ThreadToken, WaitOutcome};
use crate::protection::Protection;

const PAGE_SIZE: u64 = 4096;

struct MockRegion {
    bytes: Vec<u8>,
    protection: Protection,
}

struct MockState {
    regions: BTreeMap<u64, MockRegion>,
    /// Bases handed out by `allocate`, still live
    allocations: Vec<u64>,
    /// Remote threads started, as (entry, parameter)
    threads: Vec<(u64, u64)>,
    deny_allocations: bool,
}

struct MockInner {
    pid: u32,
    is_64_bit: bool,
    modules: Mutex<Vec<ModuleInfo>>,
    /// Address range `allocate` may place regions in
    arena: Mutex<(u64, u64)>,
    state: Mutex<MockState>,
}

/// A simulated target process backed by host memory
#[derive(Clone)]
pub struct MockProcess {
    inner: Arc<MockInner>,
}

impl MockProcess {
    /// Create a mock process with the given pointer width (32 or 64)
    pub fn new(bitness: u32) -> Self {
        assert!(bitness == 32 || bitness == 64, "bitness must be 32 or 64");
        Self {
            inner: Arc::new(MockInner {
                pid: 4242,
                is_64_bit: bitness == 64,
                modules: Mutex::new(Vec::new()),
                // Default arena: a comfortable span well inside user space
                arena: Mutex::new((0x1000_0000, 0x7000_0000)),
                state: Mutex::new(MockState {
                    regions: BTreeMap::new(),
                    allocations: Vec::new(),
                    threads: Vec::new(),
                    deny_allocations: false,
                }),
            }),
        }
    }

    /// Register a module visible through `modules()`
    pub fn add_module(&self, name: &str, base: u64, size: u64) {
        self.inner.modules.lock().push(ModuleInfo {
            name: name.to_string(),
            base,
            size,
        });
    }

    /// Map a region of bytes at `base` with the given protection
    pub fn map_region(&self, base: u64, bytes: Vec<u8>, protection: Protection) {
        self.inner
            .state
            .lock()
            .regions
            .insert(base, MockRegion { bytes, protection });
    }

    /// Constrain the range `allocate` may place fresh regions in.
    ///
    /// Placing the arena farther than 2 GiB from a hook site makes every
    /// near-jump reservation fail, which is how the `NearOnly` failure
    /// path is tested.
    pub fn set_arena(&self, start: u64, end: u64) {
        *self.inner.arena.lock() = (start, end);
    }

    /// Make every subsequent allocation fail
    pub fn deny_allocations(&self) {
        self.inner.state.lock().deny_allocations = true;
    }

    /// Copy `len` bytes out of the image regardless of protection
    /// (test inspection only)
    pub fn snapshot(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let state = self.inner.state.lock();
        let (base, region) = state.regions.range(..=address).next_back()?;
        let offset = (address - base) as usize;
        if offset + len > region.bytes.len() {
            return None;
        }
        Some(region.bytes[offset..offset + len].to_vec())
    }

    /// Bases of allocations currently live
    pub fn live_allocations(&self) -> Vec<u64> {
        self.inner.state.lock().allocations.clone()
    }

    /// Remote threads started so far, as (entry, parameter)
    pub fn spawned_threads(&self) -> Vec<(u64, u64)> {
        self.inner.state.lock().threads.clone()
    }

    fn locate(
        state: &MockState,
        address: u64,
        len: usize,
    ) -> Result<(u64, usize), OsError> {
        let (base, region) = state
            .regions
            .range(..=address)
            .next_back()
            .ok_or(OsError::ReadFailed { address, code: 0 })?;
        let offset = (address - base) as usize;
        if offset + len > region.bytes.len() {
            return Err(OsError::ReadFailed { address, code: 0 });
        }
        Ok((*base, offset))
    }

    fn region_is_free(state: &MockState, base: u64, size: u64) -> bool {
        let end = base + size;
        // Any region starting before `end` and ending after `base` collides
        state
            .regions
            .range(..end)
            .next_back()
            .map_or(true, |(rbase, r)| rbase + r.bytes.len() as u64 <= base)
            && state.regions.range(base..end).next().is_none()
    }
}

impl ProcessOs for MockProcess {
    fn pid(&self) -> u32 {
        self.inner.pid
    }

    fn is_64_bit(&self) -> Result<bool, OsError> {
        Ok(self.inner.is_64_bit)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>, OsError> {
        Ok(self.inner.modules.lock().clone())
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), OsError> {
        let state = self.inner.state.lock();
        let (base, offset) = Self::locate(&state, address, buf.len())?;
        let region = &state.regions[&base];
        if !region.protection.contains(Protection::READ) {
            return Err(OsError::ReadFailed { address, code: 998 });
        }
        buf.copy_from_slice(&region.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<(), OsError> {
        let mut state = self.inner.state.lock();
        let (base, offset) = Self::locate(&state, address, bytes.len())
            .map_err(|_| OsError::WriteFailed { address, code: 0 })?;
        let region = state.regions.get_mut(&base).expect("located region");
        if !region.protection.is_writable() {
            return Err(OsError::WriteFailed { address, code: 998 });
        }
        region.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn set_protection(
        &self,
        address: u64,
        len: usize,
        protection: Protection,
    ) -> Result<Protection, OsError> {
        let mut state = self.inner.state.lock();
        let (base, _) = Self::locate(&state, address, len)
            .map_err(|_| OsError::ProtectionFailed { address, code: 0 })?;
        let region = state.regions.get_mut(&base).expect("located region");
        let old = region.protection;
        region.protection = protection;
        Ok(old)
    }

    fn allocate(&self, near: Option<u64>, size: usize, executable: bool) -> Result<u64, OsError> {
        let mut state = self.inner.state.lock();
        if state.deny_allocations {
            return Err(OsError::AllocationFailed(8));
        }
        let (arena_start, arena_end) = *self.inner.arena.lock();
        let size = (size as u64).div_ceil(PAGE_SIZE) * PAGE_SIZE;

        // Honor the hint when the spot is free and inside the arena,
        // otherwise fall back to the first free gap.
        let hinted = near
            .map(|hint| hint & !(PAGE_SIZE - 1))
            .filter(|&base| base >= arena_start && base + size <= arena_end);
        let probes = hinted
            .into_iter()
            .chain((arena_start..=arena_end.saturating_sub(size)).step_by(PAGE_SIZE as usize));

        for base in probes {
            if Self::region_is_free(&state, base, size) {
                let protection = if executable {
                    Protection::READ_WRITE_EXECUTE
                } else {
                    Protection::READ_WRITE
                };
                state.regions.insert(
                    base,
                    MockRegion {
                        bytes: vec![0u8; size as usize],
                        protection,
                    },
                );
                state.allocations.push(base);
                return Ok(base);
            }
        }
        Err(OsError::AllocationFailed(8))
    }

    fn free(&self, base: u64) -> Result<(), OsError> {
        let mut state = self.inner.state.lock();
        let index = state
            .allocations
            .iter()
            .position(|&b| b == base)
            .ok_or(OsError::InvalidBase(base))?;
        state.allocations.remove(index);
        state.regions.remove(&base);
        Ok(())
    }

    fn spawn_thread(&self, entry: u64, parameter: u64) -> Result<ThreadToken, OsError> {
        let mut state = self.inner.state.lock();
        state.threads.push((entry, parameter));
        Ok(ThreadToken(state.threads.len() as u64))
    }

    fn join_thread(&self, _thread: ThreadToken, _timeout: Duration) -> Result<WaitOutcome, OsError> {
        Ok(WaitOutcome::Signaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip() {
        let mock = MockProcess::new(64);
        mock.map_region(0x1000, vec![0u8; 64], Protection::READ_WRITE);

        mock.write_memory(0x1010, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        mock.read_memory(0x1010, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_write_protected_region_fails() {
        let mock = MockProcess::new(64);
        mock.map_region(0x1000, vec![0u8; 64], Protection::READ_EXECUTE);

        let err = mock.write_memory(0x1000, &[0x90]).unwrap_err();
        assert!(matches!(err, OsError::WriteFailed { .. }));

        // Lifting the protection makes the same write succeed
        let old = mock
            .set_protection(0x1000, 1, Protection::READ_WRITE_EXECUTE)
            .unwrap();
        assert_eq!(old, Protection::READ_EXECUTE);
        mock.write_memory(0x1000, &[0x90]).unwrap();
    }

    #[test]
    fn test_read_past_region_end_fails() {
        let mock = MockProcess::new(64);
        mock.map_region(0x1000, vec![0u8; 16], Protection::READ);
        let mut buf = [0u8; 32];
        assert!(mock.read_memory(0x1008, &mut buf).is_err());
    }

    #[test]
    fn test_allocate_honors_hint() {
        let mock = MockProcess::new(64);
        let base = mock.allocate(Some(0x2000_0000), 64, true).unwrap();
        assert_eq!(base, 0x2000_0000);
        assert_eq!(mock.live_allocations(), vec![base]);

        // The fresh region is writable and executable
        mock.write_memory(base, &[0xCC; 8]).unwrap();
        assert_eq!(mock.snapshot(base, 8).unwrap(), vec![0xCC; 8]);
    }

    #[test]
    fn test_allocate_out_of_arena_hint_falls_back() {
        let mock = MockProcess::new(64);
        mock.set_arena(0x1000_0000, 0x1100_0000);
        let base = mock.allocate(Some(0x7FFF_0000_0000), 64, false).unwrap();
        assert!((0x1000_0000..0x1100_0000).contains(&base));
    }

    #[test]
    fn test_denied_allocation() {
        let mock = MockProcess::new(64);
        mock.deny_allocations();
        assert!(matches!(
            mock.allocate(None, 64, true),
            Err(OsError::AllocationFailed(_))
        ));
    }

    #[test]
    fn test_free_unknown_base() {
        let mock = MockProcess::new(64);
        assert!(matches!(mock.free(0x1234), Err(OsError::InvalidBase(_))));
    }
}
