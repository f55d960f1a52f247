//! Buffer bridge: scoped scratch allocations in the engine arena.
//!
//! Every operation that returns a numeric vector stages it through a
//! [`ScratchBuffer`]: acquire, pass the descriptor into the engine call that
//! fills it, read the contents back, release. The guard's destructor performs
//! the release on any exit path the caller did not cover explicitly, so an
//! engine-call failure between acquire and readback cannot leak the
//! allocation.

use std::sync::Arc;

use tracing::warn;
use vectext_core::{BridgeError, BridgeResult};

use crate::traits::{ScratchRef, SharedEngine};

/// A single-use f32 scratch region in the engine arena.
///
/// Exclusively owned by the operation that acquired it; never retained
/// across calls.
pub struct ScratchBuffer {
    engine: SharedEngine,
    slot: ScratchRef,
    released: bool,
}

impl std::fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("slot", &self.slot)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl ScratchBuffer {
    /// Allocates `len` f32 elements in the engine arena.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` when the arena cannot satisfy the allocation;
    /// nothing is left dangling in that case.
    pub fn acquire(engine: &SharedEngine, len: u32) -> BridgeResult<Self> {
        let bytes = len
            .checked_mul(4)
            .ok_or_else(|| BridgeError::out_of_memory(u64::from(len) * 4))?;
        let ptr = engine.lock().malloc(bytes)?;
        Ok(Self {
            engine: Arc::clone(engine),
            slot: ScratchRef { ptr, len },
            released: false,
        })
    }

    /// The address/length descriptor to hand into an engine call.
    #[must_use]
    pub fn slot(&self) -> ScratchRef {
        self.slot
    }

    /// Number of f32 elements in the region.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.slot.len
    }

    /// Whether the region holds zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.len == 0
    }

    /// Copies the region's current contents into host memory.
    pub fn readback(&self) -> BridgeResult<Vec<f32>> {
        let mut raw = vec![0u8; self.slot.byte_len() as usize];
        self.engine.lock().peek(self.slot.ptr, &mut raw)?;
        Ok(raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Releases the allocation, surfacing any engine fault.
    ///
    /// Dropping the buffer releases it too; the explicit form exists so the
    /// happy path can observe release failures instead of logging them.
    pub fn release(mut self) -> BridgeResult<()> {
        self.released = true;
        self.engine.lock().free(self.slot.ptr)
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.engine.lock().free(self.slot.ptr) {
            warn!(ptr = self.slot.ptr, %err, "scratch release failed in destructor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEngine, ModelFixture};
    use crate::traits::{share, TextEngine};

    fn engine_with_model(dimension: u32) -> SharedEngine {
        let mut engine = MockEngine::new();
        let bytes = ModelFixture::new(dimension).word("alpha", 3).build();
        engine.write_file("model.bin", &bytes).unwrap();
        engine.load_model("model.bin").unwrap();
        share(engine)
    }

    #[test]
    fn test_acquire_fill_readback_release() {
        let engine = engine_with_model(8);
        let baseline = engine.lock().arena_in_use();

        let buf = ScratchBuffer::acquire(&engine, 8).unwrap();
        engine.lock().word_vector(buf.slot(), "alpha").unwrap();
        let values = buf.readback().unwrap();
        assert_eq!(values.len(), 8);
        buf.release().unwrap();

        assert_eq!(engine.lock().arena_in_use(), baseline);
    }

    #[test]
    fn test_drop_releases_on_engine_failure() {
        let engine = engine_with_model(8);
        let baseline = engine.lock().arena_in_use();

        {
            // Wrong-sized buffer: the engine call fails, the guard still
            // returns the allocation.
            let buf = ScratchBuffer::acquire(&engine, 4).unwrap();
            assert!(engine.lock().word_vector(buf.slot(), "alpha").is_err());
        }

        assert_eq!(engine.lock().arena_in_use(), baseline);
    }

    #[test]
    fn test_allocation_failure_leaves_no_residue() {
        let engine = share(MockEngine::with_arena_capacity(64));
        let baseline = engine.lock().arena_in_use();

        let holder = ScratchBuffer::acquire(&engine, 8).unwrap();
        let err = ScratchBuffer::acquire(&engine, 1024).unwrap_err();
        assert!(matches!(err, BridgeError::OutOfMemory { .. }));

        holder.release().unwrap();
        assert_eq!(engine.lock().arena_in_use(), baseline);
    }
}
