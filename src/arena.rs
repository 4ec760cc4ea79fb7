//! # Memory Arena
//!
//! Bump-pointer heap emulator backing `brk`, `mmap`, and `munmap`. The
//! arena is a fixed window `[HEAP_BASE, HEAP_CEILING)` inside the engine's
//! flat memory; the break moves inside it and never leaves it.
//!
//! ## Invariant
//!
//! `heap_base <= current_break <= heap_ceiling` at all times. Any operation
//! that would violate the window fails with [`ArenaError`] rather than
//! silently clamping.
//!
//! ## Mapping Registry
//!
//! Zero-hint and fixed-hint mappings are both recorded in an explicit
//! (address, length) registry, so `munmap` can validate that a region was
//! actually mapped and fixed-hint requests can be checked for collisions.
//! The registry is bounded by [`MAX_MAPPINGS`].

use crate::constants::{HEAP_BASE, HEAP_CEILING, MAX_MAPPINGS, PAGE_SIZE};
use tracing::{debug, warn};

/// Failure modes of arena operations.
///
/// The dispatcher maps `OutOfRange` to `ENOMEM` and `InvalidArgument`
/// to `EINVAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// Request falls outside the heap window or overflows it.
    OutOfRange,
    /// Misaligned address, zero length, unknown mapping, or collision.
    InvalidArgument,
}

/// One registered mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub addr: u32,
    pub len: u32,
}

impl Mapping {
    fn end(&self) -> u64 {
        u64::from(self.addr) + u64::from(self.len)
    }

    fn overlaps(&self, other: &Mapping) -> bool {
        u64::from(self.addr) < other.end() && u64::from(other.addr) < self.end()
    }
}

/// Bump-pointer heap over a fixed window.
#[derive(Debug)]
pub struct MemoryArena {
    heap_base: u32,
    heap_ceiling: u32,
    current_break: u32,
    mappings: Vec<Mapping>,
}

impl MemoryArena {
    /// Arena over the default window from [`crate::constants`].
    pub fn new() -> Self {
        Self::with_window(HEAP_BASE, HEAP_CEILING)
    }

    /// Arena over an explicit window. `base` must not exceed `ceiling`.
    pub fn with_window(base: u32, ceiling: u32) -> Self {
        debug_assert!(base <= ceiling);
        Self {
            heap_base: base,
            heap_ceiling: ceiling,
            current_break: base,
            mappings: Vec::new(),
        }
    }

    /// Current program break (`brk(0)` query).
    pub fn query_break(&self) -> u32 {
        self.current_break
    }

    pub fn heap_base(&self) -> u32 {
        self.heap_base
    }

    pub fn heap_ceiling(&self) -> u32 {
        self.heap_ceiling
    }

    /// Moves the break to `new_break`.
    ///
    /// Fails with `OutOfRange` if the target leaves `[base, ceiling)`;
    /// the break is left unchanged on failure.
    pub fn set_break(&mut self, new_break: u32) -> Result<u32, ArenaError> {
        if new_break < self.heap_base || new_break >= self.heap_ceiling {
            return Err(ArenaError::OutOfRange);
        }
        self.current_break = new_break;
        Ok(new_break)
    }

    /// Maps `length` bytes, mmap-style.
    ///
    /// With a zero `hint` the break is rounded up to the next page
    /// boundary, advanced past `length`, and the aligned address returned.
    /// A non-zero `hint` requests a fixed mapping: it must be page-aligned
    /// and must not collide with a registered mapping, and is returned
    /// unchanged without moving the break.
    pub fn map(&mut self, length: u32, hint: u32) -> Result<u32, ArenaError> {
        if length == 0 {
            return Err(ArenaError::InvalidArgument);
        }
        if hint != 0 {
            return self.map_fixed(hint, length);
        }

        // Overflow-safe: all arithmetic in u64 against the u32 ceiling.
        let aligned = page_align_up(u64::from(self.current_break));
        let end = aligned + u64::from(length);
        if end > u64::from(self.heap_ceiling) {
            warn!(
                "mmap of {} bytes exceeds heap ceiling (break at {:#x})",
                length, self.current_break
            );
            return Err(ArenaError::OutOfRange);
        }

        let addr = aligned as u32;
        self.register(Mapping { addr, len: length })?;
        self.current_break = end as u32;
        debug!("mapped {} bytes at {:#x}", length, addr);
        Ok(addr)
    }

    fn map_fixed(&mut self, addr: u32, length: u32) -> Result<u32, ArenaError> {
        if addr % PAGE_SIZE != 0 {
            return Err(ArenaError::InvalidArgument);
        }
        let candidate = Mapping { addr, len: length };
        if self.mappings.iter().any(|m| m.overlaps(&candidate)) {
            debug!("fixed mmap at {:#x} collides with a registered mapping", addr);
            return Err(ArenaError::InvalidArgument);
        }
        self.register(candidate)?;
        Ok(addr)
    }

    fn register(&mut self, mapping: Mapping) -> Result<(), ArenaError> {
        if self.mappings.len() >= MAX_MAPPINGS {
            warn!("mapping registry full ({} regions)", MAX_MAPPINGS);
            return Err(ArenaError::OutOfRange);
        }
        self.mappings.push(mapping);
        Ok(())
    }

    /// Unmaps a region previously returned by [`map`](Self::map).
    ///
    /// `addr` must be page-aligned and `(addr, length)` must exactly match
    /// a registered mapping. The registry entry is removed; break space is
    /// not reclaimed (bump allocator).
    pub fn unmap(&mut self, addr: u32, length: u32) -> Result<(), ArenaError> {
        if addr % PAGE_SIZE != 0 || length == 0 {
            return Err(ArenaError::InvalidArgument);
        }
        match self
            .mappings
            .iter()
            .position(|m| m.addr == addr && m.len == length)
        {
            Some(pos) => {
                self.mappings.swap_remove(pos);
                debug!("unmapped {} bytes at {:#x}", length, addr);
                Ok(())
            }
            None => Err(ArenaError::InvalidArgument),
        }
    }

    /// Registered mappings, for status reporting.
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Bytes between base and the current break.
    pub fn used_bytes(&self) -> u32 {
        self.current_break - self.heap_base
    }
}

impl Default for MemoryArena {
    fn default() -> Self {
        Self::new()
    }
}

fn page_align_up(value: u64) -> u64 {
    value.div_ceil(u64::from(PAGE_SIZE)) * u64::from(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_starts_at_base() {
        let arena = MemoryArena::new();
        assert_eq!(arena.query_break(), HEAP_BASE);
    }

    #[test]
    fn set_break_rejects_out_of_window() {
        let mut arena = MemoryArena::new();
        assert_eq!(
            arena.set_break(HEAP_BASE - 1),
            Err(ArenaError::OutOfRange)
        );
        assert_eq!(
            arena.set_break(HEAP_CEILING),
            Err(ArenaError::OutOfRange)
        );
        // Break unchanged after failures.
        assert_eq!(arena.query_break(), HEAP_BASE);
    }

    #[test]
    fn zero_hint_maps_are_page_aligned_and_monotonic() {
        let mut arena = MemoryArena::new();
        let mut last = 0;
        for len in [100, 4096, 5000, 1] {
            let addr = arena.map(len, 0).unwrap();
            assert_eq!(addr % PAGE_SIZE, 0);
            assert!(addr >= last);
            last = addr;
        }
    }

    #[test]
    fn map_past_ceiling_fails_without_moving_break() {
        let mut arena = MemoryArena::with_window(HEAP_BASE, HEAP_BASE + 2 * PAGE_SIZE);
        let before = arena.query_break();
        assert_eq!(arena.map(3 * PAGE_SIZE, 0), Err(ArenaError::OutOfRange));
        assert_eq!(arena.query_break(), before);
    }

    #[test]
    fn unmap_requires_exact_registered_region() {
        let mut arena = MemoryArena::new();
        let addr = arena.map(8192, 0).unwrap();
        assert_eq!(arena.unmap(addr + 4096, 4096), Err(ArenaError::InvalidArgument));
        assert_eq!(arena.unmap(addr, 4096), Err(ArenaError::InvalidArgument));
        assert_eq!(arena.unmap(addr, 8192), Ok(()));
        // Double unmap fails.
        assert_eq!(arena.unmap(addr, 8192), Err(ArenaError::InvalidArgument));
    }

    #[test]
    fn fixed_hint_collision_is_rejected() {
        let mut arena = MemoryArena::new();
        let fixed = HEAP_CEILING + 0x10_0000;
        assert_eq!(arena.map(4096, fixed), Ok(fixed));
        assert_eq!(arena.map(4096, fixed), Err(ArenaError::InvalidArgument));
        // Unaligned hint rejected outright.
        assert_eq!(arena.map(4096, fixed + 1), Err(ArenaError::InvalidArgument));
    }
}
