//! Capability interface over the native inference engine.
//!
//! The engine is a precompiled, opaque compute unit with its own linear
//! memory. The host never reads engine-internal structures directly; numeric
//! results travel through caller-allocated scratch regions in the engine
//! arena, and sequence results travel through engine-owned container handles
//! that the caller must dispose. This trait is the entire surface the rest of
//! the bridge is allowed to touch.
//!
//! Quantized and full-precision engines are distinguished only by the
//! `quantized` metadata flag, never by separate bridge code paths.

use std::sync::Arc;

use parking_lot::Mutex;
use vectext_core::{BridgeResult, MatrixKind};

/// Handle to an engine-owned sequence container.
///
/// The handle stays valid until `seq_dispose` is called for it; the engine
/// does not reclaim containers on its own.
pub type SeqHandle = u32;

/// Address/length descriptor for a scratch region in the engine arena.
///
/// `len` counts f32 elements, not bytes. The region must have been allocated
/// with `malloc` and sized exactly for the operation it is passed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchRef {
    /// Arena address of the first element.
    pub ptr: u32,
    /// Number of f32 elements.
    pub len: u32,
}

impl ScratchRef {
    /// Size of the referenced region in bytes.
    #[must_use]
    pub fn byte_len(&self) -> u32 {
        self.len * 4
    }
}

/// Metadata the engine reports for its loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineMetadata {
    /// Dimension of a lookup vector.
    pub dimension: u32,
    /// Whether the loaded model is quantized.
    pub quantized: bool,
}

/// The raw engine call surface.
///
/// All calls are synchronous and blocking; the engine has no internal
/// concurrency and no cancellation. Callers serialize access through
/// [`SharedEngine`], so at most one marshaling operation touches the arena at
/// a time.
pub trait TextEngine: Send {
    // --- arena primitives ---

    /// Allocates `bytes` bytes in the engine arena, returning the address.
    fn malloc(&mut self, bytes: u32) -> BridgeResult<u32>;

    /// Frees an allocation previously returned by `malloc`.
    fn free(&mut self, ptr: u32) -> BridgeResult<()>;

    /// Copies bytes out of the arena into `out`.
    fn peek(&self, ptr: u32, out: &mut [u8]) -> BridgeResult<()>;

    /// Copies `data` into the arena at `ptr`.
    fn poke(&mut self, ptr: u32, data: &[u8]) -> BridgeResult<()>;

    /// Bytes currently allocated and not yet freed.
    fn arena_in_use(&self) -> u64;

    // --- private filesystem ---

    /// Writes a file into the engine's private filesystem.
    fn write_file(&mut self, path: &str, bytes: &[u8]) -> BridgeResult<()>;

    /// Reads a file back out of the engine's private filesystem.
    fn read_file(&mut self, path: &str) -> BridgeResult<Vec<u8>>;

    /// Removes a file from the engine's private filesystem.
    fn unlink(&mut self, path: &str) -> BridgeResult<()>;

    // --- model lifecycle ---

    /// Parses the model staged at `path` inside the private filesystem.
    fn load_model(&mut self, path: &str) -> BridgeResult<()>;

    /// Serializes the loaded model to `path` inside the private filesystem.
    fn save_model(&mut self, path: &str) -> BridgeResult<()>;

    /// Metadata of the loaded model.
    fn metadata(&self) -> BridgeResult<EngineMetadata>;

    // --- buffer-filling vector operations ---

    /// Writes the vector for `word` into the scratch region.
    fn word_vector(&mut self, slot: ScratchRef, word: &str) -> BridgeResult<()>;

    /// Writes the vector for a single line of `text` into the scratch region.
    fn sentence_vector(&mut self, slot: ScratchRef, text: &str) -> BridgeResult<()>;

    /// Writes row `row` of the input matrix into the scratch region.
    fn input_vector(&mut self, slot: ScratchRef, row: u64) -> BridgeResult<()>;

    // --- ranked operations ---

    /// Nearest `k` neighbors of `word`, as a scored container handle.
    fn nearest_neighbors(&mut self, word: &str, k: u32) -> BridgeResult<SeqHandle>;

    /// Nearest `k` neighbors of `vector(a) - vector(b) + vector(c)`.
    fn analogies(&mut self, k: u32, word_a: &str, word_b: &str, word_c: &str)
        -> BridgeResult<SeqHandle>;

    /// Top-`k` label predictions for `text` with scores `>= threshold`.
    ///
    /// Threshold filtering happens inside the engine, not in the bridge.
    fn predict(&mut self, text: &str, k: u32, threshold: f32) -> BridgeResult<SeqHandle>;

    // --- dictionary operations ---

    /// Dictionary id of `word`, or `-1` if it is not in the dictionary.
    fn word_id(&mut self, word: &str) -> BridgeResult<i64>;

    /// Input-matrix row a subword hashes to, or `-1` for an empty subword.
    fn subword_id(&mut self, subword: &str) -> BridgeResult<i64>;

    /// Subwords of `word` and the rows they hash to, as parallel host arrays.
    fn subwords(&mut self, word: &str) -> BridgeResult<(Vec<String>, Vec<i64>)>;

    /// Dictionary words and their counts, as parallel (strings, ints) handles.
    fn words(&mut self) -> BridgeResult<(SeqHandle, SeqHandle)>;

    /// Dictionary labels and their counts, as parallel (strings, ints) handles.
    fn labels(&mut self) -> BridgeResult<(SeqHandle, SeqHandle)>;

    /// Splits a line into word tokens and label tokens, as two independently
    /// sized string handles.
    fn tokenize_line(&mut self, text: &str) -> BridgeResult<(SeqHandle, SeqHandle)>;

    // --- sequence containers ---

    /// Number of elements in the container.
    fn seq_len(&mut self, handle: SeqHandle) -> BridgeResult<u32>;

    /// Scored element at `index` of a scored container.
    fn seq_scored_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<(f32, String)>;

    /// String element at `index` of a string container.
    fn seq_string_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<String>;

    /// Integer element at `index` of an integer container.
    fn seq_int_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<i64>;

    /// Allocates an independent copy of the container.
    ///
    /// The copy must be disposed separately from the original.
    fn seq_clone(&mut self, handle: SeqHandle) -> BridgeResult<SeqHandle>;

    /// Releases the container. The handle is invalid afterwards.
    fn seq_dispose(&mut self, handle: SeqHandle) -> BridgeResult<()>;

    // --- matrix access ---

    /// Dimensions of a dense model matrix. Fails on quantized models.
    fn matrix_dims(&mut self, kind: MatrixKind) -> BridgeResult<(u64, u64)>;

    /// Single cell of a dense model matrix. Fails on quantized models.
    fn matrix_at(&mut self, kind: MatrixKind, row: u64, col: u64) -> BridgeResult<f32>;
}

/// Engines are shared between the facade, scratch guards, and container
/// adapters; the mutex serializes every boundary crossing.
pub type SharedEngine = Arc<Mutex<dyn TextEngine>>;

/// Wraps an engine in the shared handle form used across the bridge.
pub fn share<E: TextEngine + 'static>(engine: E) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}
