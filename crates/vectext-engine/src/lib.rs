//! Engine boundary for VecText.
//!
//! Everything that crosses into the native engine's linear memory goes
//! through this crate: the capability trait, the arena, the scratch-buffer
//! bridge, and the result-container adapters. The deterministic mock engine
//! lets the rest of the workspace test every marshaling path without the
//! native module; the `wasm` feature adds the hosted WebAssembly backend.

pub mod arena;
pub mod mock;
pub mod results;
pub mod scratch;
pub mod traits;
#[cfg(feature = "wasm")]
pub mod wasm;

pub use arena::{Arena, MemoryStats};
pub use mock::{MockEngine, ModelFixture};
pub use results::{LineTokens, ScoredResults, VocabList};
pub use scratch::ScratchBuffer;
pub use traits::{share, EngineMetadata, ScratchRef, SeqHandle, SharedEngine, TextEngine};
#[cfg(feature = "wasm")]
pub use wasm::WasmEngine;
