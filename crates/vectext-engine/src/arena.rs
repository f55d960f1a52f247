//! Linear-memory arena backing the in-process engine.
//!
//! Models the engine's private heap: a flat byte space with explicit
//! allocate/free primitives and no automatic reclamation. Every allocation
//! the bridge makes here must be paired with exactly one free; the
//! [`in_use`](Arena::in_use) counter is the observable ground truth for
//! leak detection.

use std::collections::BTreeMap;

use vectext_core::{BridgeError, BridgeResult};

/// Offset of the first allocatable byte. Address 0 is reserved so it can
/// serve as a null sentinel.
const HEAP_BASE: u32 = 8;

/// All allocations are rounded up to this alignment.
const ALIGN: u32 = 8;

/// Allocation counters for the arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Number of successful allocations.
    pub allocs: u64,
    /// Number of successful frees.
    pub frees: u64,
    /// Bytes currently allocated.
    pub in_use: u64,
    /// High-water mark of `in_use`.
    pub peak: u64,
}

/// A contiguous free region, kept sorted by address.
#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    ptr: u32,
    size: u32,
}

/// First-fit allocator over a fixed-capacity byte heap.
#[derive(Debug)]
pub struct Arena {
    heap: Vec<u8>,
    free_list: Vec<FreeBlock>,
    live: BTreeMap<u32, u32>,
    stats: MemoryStats,
}

impl Arena {
    /// Creates an arena with `capacity` allocatable bytes.
    #[must_use]
    pub fn with_capacity(capacity: u32) -> Self {
        let total = capacity.saturating_add(HEAP_BASE);
        Self {
            heap: vec![0; total as usize],
            free_list: vec![FreeBlock {
                ptr: HEAP_BASE,
                size: capacity,
            }],
            live: BTreeMap::new(),
            stats: MemoryStats::default(),
        }
    }

    fn aligned(size: u32) -> u32 {
        size.div_ceil(ALIGN) * ALIGN
    }

    /// Allocates `size` bytes, returning the arena address.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` when no free block can satisfy the request. The
    /// arena is left unchanged in that case.
    pub fn alloc(&mut self, size: u32) -> BridgeResult<u32> {
        if size == 0 {
            return Err(BridgeError::engine("zero-sized allocation"));
        }
        let size = Self::aligned(size);

        let slot = self
            .free_list
            .iter()
            .position(|block| block.size >= size)
            .ok_or(BridgeError::OutOfMemory {
                requested: u64::from(size),
            })?;

        let block = self.free_list[slot];
        if block.size == size {
            self.free_list.remove(slot);
        } else {
            self.free_list[slot] = FreeBlock {
                ptr: block.ptr + size,
                size: block.size - size,
            };
        }

        self.live.insert(block.ptr, size);
        self.stats.allocs += 1;
        self.stats.in_use += u64::from(size);
        self.stats.peak = self.stats.peak.max(self.stats.in_use);
        Ok(block.ptr)
    }

    /// Frees the allocation at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns an engine fault if `ptr` is not a live allocation; freeing the
    /// same address twice is such a fault.
    pub fn free(&mut self, ptr: u32) -> BridgeResult<()> {
        let size = self
            .live
            .remove(&ptr)
            .ok_or_else(|| BridgeError::engine(format!("free of unallocated address {ptr}")))?;

        let at = self
            .free_list
            .partition_point(|block| block.ptr < ptr);
        self.free_list.insert(at, FreeBlock { ptr, size });
        self.coalesce();

        self.stats.frees += 1;
        self.stats.in_use -= u64::from(size);
        Ok(())
    }

    fn coalesce(&mut self) {
        let mut merged: Vec<FreeBlock> = Vec::with_capacity(self.free_list.len());
        for block in self.free_list.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.ptr + prev.size == block.ptr => prev.size += block.size,
                _ => merged.push(block),
            }
        }
        self.free_list = merged;
    }

    fn check_span(&self, ptr: u32, len: usize) -> BridgeResult<()> {
        let end = (ptr as usize).checked_add(len);
        match end {
            Some(end) if ptr >= HEAP_BASE && end <= self.heap.len() => Ok(()),
            _ => Err(BridgeError::engine(format!(
                "access of {len} bytes at address {ptr} is outside the arena"
            ))),
        }
    }

    /// Copies bytes out of the arena into `out`.
    pub fn read(&self, ptr: u32, out: &mut [u8]) -> BridgeResult<()> {
        self.check_span(ptr, out.len())?;
        let start = ptr as usize;
        out.copy_from_slice(&self.heap[start..start + out.len()]);
        Ok(())
    }

    /// Copies `data` into the arena at `ptr`.
    pub fn write(&mut self, ptr: u32, data: &[u8]) -> BridgeResult<()> {
        self.check_span(ptr, data.len())?;
        let start = ptr as usize;
        self.heap[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Writes a float slice into the arena in little-endian layout.
    pub fn write_f32s(&mut self, ptr: u32, values: &[f32]) -> BridgeResult<()> {
        self.check_span(ptr, values.len() * 4)?;
        let start = ptr as usize;
        for (i, value) in values.iter().enumerate() {
            let at = start + i * 4;
            self.heap[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    /// Verifies that `ptr` is a live allocation of at least `bytes` bytes.
    pub fn check_allocation(&self, ptr: u32, bytes: u32) -> BridgeResult<()> {
        match self.live.get(&ptr) {
            Some(size) if *size >= bytes => Ok(()),
            Some(size) => Err(BridgeError::engine(format!(
                "buffer at {ptr} holds {size} bytes, operation needs {bytes}"
            ))),
            None => Err(BridgeError::engine(format!(
                "buffer address {ptr} is not a live allocation"
            ))),
        }
    }

    /// Bytes currently allocated and not yet freed.
    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.stats.in_use
    }

    /// Snapshot of the allocation counters.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_restores_baseline() {
        let mut arena = Arena::with_capacity(4096);
        let baseline = arena.in_use();

        let ptrs: Vec<u32> = (0..8).map(|_| arena.alloc(64).unwrap()).collect();
        assert!(arena.in_use() > baseline);

        for ptr in ptrs {
            arena.free(ptr).unwrap();
        }
        assert_eq!(arena.in_use(), baseline);
    }

    #[test]
    fn test_coalescing_allows_reuse() {
        let mut arena = Arena::with_capacity(256);
        let a = arena.alloc(128).unwrap();
        let b = arena.alloc(128).unwrap();
        arena.free(a).unwrap();
        arena.free(b).unwrap();

        // After coalescing the full capacity is a single block again.
        let big = arena.alloc(256).unwrap();
        arena.free(big).unwrap();
    }

    #[test]
    fn test_exhaustion_is_out_of_memory() {
        let mut arena = Arena::with_capacity(64);
        let ptr = arena.alloc(64).unwrap();
        let err = arena.alloc(8).unwrap_err();
        assert!(matches!(err, BridgeError::OutOfMemory { .. }));

        // The failed allocation left nothing dangling.
        arena.free(ptr).unwrap();
        assert_eq!(arena.in_use(), 0);
    }

    #[test]
    fn test_double_free_is_fault() {
        let mut arena = Arena::with_capacity(64);
        let ptr = arena.alloc(16).unwrap();
        arena.free(ptr).unwrap();
        assert!(matches!(arena.free(ptr), Err(BridgeError::Engine { .. })));
    }

    #[test]
    fn test_out_of_bounds_access_is_fault() {
        let arena = Arena::with_capacity(64);
        let mut out = [0u8; 16];
        assert!(arena.read(60 + HEAP_BASE, &mut out).is_err());
        assert!(arena.read(0, &mut out).is_err());
    }

    #[test]
    fn test_f32_roundtrip() {
        let mut arena = Arena::with_capacity(64);
        let ptr = arena.alloc(16).unwrap();
        arena.write_f32s(ptr, &[1.0, -2.5, 0.25, 4.0]).unwrap();

        let mut raw = [0u8; 16];
        arena.read(ptr, &mut raw).unwrap();
        let values: Vec<f32> = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![1.0, -2.5, 0.25, 4.0]);
        arena.free(ptr).unwrap();
    }
}
