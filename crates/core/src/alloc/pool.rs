//! Pool of OS allocations and their sub-reservations

use std::collections::BTreeMap;

use mesmer_sys::ProcessOs;
use slotmap::{new_key_type, SlotMap};

use crate::error::{MemoryError, MemoryResult};
use crate::range::MemoryRange;

use super::ReserveRequest;

/// Page size assumed for parent allocations
const PAGE_SIZE: u64 = 4096;

/// Minimum alignment of every reservation (machine word)
const WORD_ALIGN: u64 = 8;

/// Probe step when hinting the OS toward a constrained range
const PROBE_STEP: u64 = PAGE_SIZE * 64;

/// Probes in each direction before giving up on hinted placement
const MAX_PROBES: usize = 64;

new_key_type! {
    /// Key of a live sub-reservation inside its parent
    pub struct ReservationKey;
}

/// A parent OS allocation and its carved-up interior
struct Parent {
    size: u64,
    executable: bool,
    /// Disjoint, sorted free sub-ranges
    free: Vec<MemoryRange>,
    live: SlotMap<ReservationKey, MemoryRange>,
}

/// What `reserve` hands back: enough to find the reservation again
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReservedSlot {
    pub parent: u64,
    pub key: ReservationKey,
    pub range: MemoryRange,
}

/// All pool state, guarded by the attachment's mutex
#[derive(Default)]
pub(crate) struct PoolState {
    parents: BTreeMap<u64, Parent>,
}

impl PoolState {
    /// Reserve `request.size` bytes per the request's constraints.
    pub fn reserve(
        &mut self,
        os: &dyn ProcessOs,
        request: &ReserveRequest,
    ) -> MemoryResult<ReservedSlot> {
        if request.size == 0 {
            return Err(MemoryError::InvalidArgument("zero-sized reservation".into()));
        }
        let wanted = request.range.unwrap_or_else(MemoryRange::full);

        // Existing parents, nearest to the preference first
        let near = request.near.unwrap_or(wanted.start);
        let mut bases: Vec<u64> = self
            .parents
            .iter()
            .filter(|(_, p)| p.executable == request.executable)
            .map(|(&b, _)| b)
            .collect();
        bases.sort_by_key(|&b| b.abs_diff(near));

        for base in bases {
            if let Some(slot) = self.carve(base, request.size as u64, &wanted) {
                return Ok(slot);
            }
        }

        // No parent fits: ask the OS for a fresh block
        let base = self.allocate_parent(os, request, &wanted)?;
        self.carve(base, request.size as u64, &wanted)
            .ok_or_else(|| {
                // A fresh in-range parent always has room; this is a bug guard
                MemoryError::AllocationFailure(mesmer_sys::OsError::AllocationFailed(0))
            })
    }

    /// Try to carve `size` aligned bytes out of one parent's free list
    fn carve(&mut self, base: u64, size: u64, wanted: &MemoryRange) -> Option<ReservedSlot> {
        let parent = self.parents.get_mut(&base)?;
        let (index, slice) = parent.free.iter().enumerate().find_map(|(i, f)| {
            let usable = f.intersect(wanted)?.align_inward(WORD_ALIGN)?;
            if usable.size() < size {
                return None;
            }
            Some((
                i,
                MemoryRange {
                    start: usable.start,
                    end: usable.start + size - 1,
                },
            ))
        })?;

        let remainder = parent.free.remove(index).exclude(&slice);
        parent.free.extend(remainder);
        normalize(&mut parent.free);

        let key = parent.live.insert(slice);
        Some(ReservedSlot {
            parent: base,
            key,
            range: slice,
        })
    }

    /// Allocate a fresh parent block inside `wanted`, probing hint
    /// addresses outward from the preference.
    fn allocate_parent(
        &mut self,
        os: &dyn ProcessOs,
        request: &ReserveRequest,
        wanted: &MemoryRange,
    ) -> MemoryResult<u64> {
        let size = (request.size as u64).div_ceil(PAGE_SIZE) * PAGE_SIZE;

        let mut hints: Vec<Option<u64>> = Vec::new();
        if let Some(near) = request.near {
            let anchor = near.clamp(wanted.start, wanted.end) & !(PAGE_SIZE - 1);
            hints.push(Some(anchor));
            for step in 1..=MAX_PROBES as u64 {
                let up = anchor.saturating_add(step * PROBE_STEP);
                if wanted.contains(up) {
                    hints.push(Some(up));
                }
                let down = anchor.saturating_sub(step * PROBE_STEP);
                if down != anchor && wanted.contains(down) {
                    hints.push(Some(down));
                }
            }
        }
        hints.push(Some(wanted.start));
        hints.push(None);

        let mut last_error = mesmer_sys::OsError::AllocationFailed(0);
        for hint in hints {
            let base = match os.allocate(hint, size as usize, request.executable) {
                Ok(base) => base,
                Err(e) => {
                    last_error = e;
                    continue;
                }
            };
            let block = MemoryRange {
                start: base,
                end: base + size - 1,
            };
            if !wanted.contains_range(&block) {
                // The OS placed it outside the constraint; hand it back
                let _ = os.free(base);
                continue;
            }
            tracing::debug!(
                "Allocated parent block {:#x}..{:#x} (executable: {})",
                base,
                base + size,
                request.executable
            );
            self.parents.insert(
                base,
                Parent {
                    size,
                    executable: request.executable,
                    free: vec![block],
                    live: SlotMap::with_key(),
                },
            );
            return Ok(base);
        }

        tracing::debug!("No parent block allocatable inside {wanted}");
        Err(MemoryError::AllocationFailure(last_error))
    }

    /// Return the trailing bytes of a reservation to the free list
    pub fn shrink(
        &mut self,
        parent: u64,
        key: ReservationKey,
        new_size: u64,
    ) -> MemoryResult<MemoryRange> {
        let parent = self
            .parents
            .get_mut(&parent)
            .ok_or(MemoryError::InvalidArgument("unknown parent block".into()))?;
        let range = parent
            .live
            .get_mut(key)
            .ok_or(MemoryError::InvalidArgument("unknown reservation".into()))?;
        if new_size == 0 || new_size > range.size() {
            return Err(MemoryError::InvalidArgument(format!(
                "cannot shrink {} bytes to {new_size}",
                range.size()
            )));
        }
        let tail = MemoryRange {
            start: range.start + new_size,
            end: range.end,
        };
        range.end = range.start + new_size - 1;
        let shrunk = *range;
        if tail.start <= tail.end {
            parent.free.push(tail);
            normalize(&mut parent.free);
        }
        Ok(shrunk)
    }

    /// Release a reservation entirely
    pub fn release(&mut self, parent: u64, key: ReservationKey) -> MemoryResult<()> {
        let parent = self
            .parents
            .get_mut(&parent)
            .ok_or(MemoryError::InvalidArgument("unknown parent block".into()))?;
        let range = parent
            .live
            .remove(key)
            .ok_or(MemoryError::InvalidArgument("unknown reservation".into()))?;
        parent.free.push(range);
        normalize(&mut parent.free);
        Ok(())
    }

    /// Free parents with no live reservations back to the OS
    pub fn release_unused_parents(&mut self, os: &dyn ProcessOs) {
        let empty: Vec<u64> = self
            .parents
            .iter()
            .filter(|(_, p)| p.live.is_empty())
            .map(|(&b, _)| b)
            .collect();
        for base in empty {
            if let Err(e) = os.free(base) {
                tracing::warn!("Failed to free parent block {base:#x}: {e}");
            }
            self.parents.remove(&base);
        }
    }

    /// Free every parent back to the OS (attachment teardown)
    pub fn release_all(&mut self, os: &dyn ProcessOs) {
        for (&base, _) in self.parents.iter() {
            if let Err(e) = os.free(base) {
                tracing::warn!("Failed to free parent block {base:#x}: {e}");
            }
        }
        self.parents.clear();
    }

    #[cfg(test)]
    fn invariants_hold(&self) -> bool {
        self.parents.iter().all(|(&base, p)| {
            let block = MemoryRange {
                start: base,
                end: base + p.size - 1,
            };
            let live: Vec<MemoryRange> = p.live.values().copied().collect();
            let disjoint = live.iter().enumerate().all(|(i, a)| {
                live.iter().skip(i + 1).all(|b| !a.overlaps(b))
                    && p.free.iter().all(|f| !a.overlaps(f))
            });
            let contained = live.iter().chain(p.free.iter()).all(|r| block.contains_range(r));
            let total: u64 = live.iter().map(MemoryRange::size).sum();
            disjoint && contained && total <= p.size
        })
    }
}

/// Sort and merge a free list in place
fn normalize(free: &mut Vec<MemoryRange>) {
    free.sort_by_key(|r| r.start);
    let mut merged: Vec<MemoryRange> = Vec::with_capacity(free.len());
    for range in free.drain(..) {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    *free = merged;
}
