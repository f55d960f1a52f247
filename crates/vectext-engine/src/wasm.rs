//! WebAssembly engine backend.
//!
//! Hosts a precompiled engine module inside a `wasmtime` store and implements
//! [`TextEngine`] by marshaling every call through the module's exported
//! linear memory. The module is the opaque collaborator: all tokenization,
//! hashing, and scoring behavior is its own.
//!
//! # Expected export ABI
//!
//! The module must export a linear memory named `memory` plus a flat call
//! surface (`vt_` prefix). Pointers and lengths are `i32` offsets into the
//! exported memory. Functions returning containers or guest strings pack two
//! 32-bit values into an `i64` (`high << 32 | low`): `ptr/len` for strings,
//! `first/second` for handle pairs. Negative scalar returns are fault codes:
//!
//! | code | meaning |
//! |------|---------|
//! | `-1` | model not loaded |
//! | `-2` | model parse failed |
//! | `-3` | arena exhausted |
//! | `-4` | unknown container handle |
//! | `-5` | unsupported on quantized model |
//! | `-6` | engine fault |
//!
//! Guest strings returned to the host are guest-allocated copies; the host
//! frees them with `vt_free` after reading. Value-returning accessors
//! (`vt_seq_score_at`, `vt_matrix_at`) have no error channel, so the host
//! validates indices against `vt_seq_len` / `vt_matrix_rows` first.

use std::collections::HashMap;

use tracing::info;
use wasmtime::{Instance, Memory, Module, Store, TypedFunc};

use vectext_core::{BridgeError, BridgeResult, MatrixKind};

use crate::traits::{EngineMetadata, ScratchRef, SeqHandle, TextEngine};

const RC_NOT_LOADED: i64 = -1;
const RC_LOAD_FAILED: i64 = -2;
const RC_OOM: i64 = -3;
const RC_BAD_HANDLE: i64 = -4;
const RC_QUANTIZED: i64 = -5;

fn rc_error(code: i64, context: &str) -> BridgeError {
    match code {
        RC_NOT_LOADED => BridgeError::ModelNotLoaded,
        RC_LOAD_FAILED => BridgeError::model_load(format!("engine rejected model ({context})")),
        RC_OOM => BridgeError::out_of_memory(0),
        RC_BAD_HANDLE => BridgeError::engine(format!("unknown container handle ({context})")),
        RC_QUANTIZED => BridgeError::QuantizedModel,
        other => BridgeError::engine(format!("{context} failed with code {other}")),
    }
}

fn call_error(err: wasmtime::Error, context: &str) -> BridgeError {
    BridgeError::engine(format!("{context} trapped: {err}"))
}

fn unpack(pair: i64) -> (u32, u32) {
    ((pair >> 32) as u32, pair as u32)
}

struct Exports {
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    fs_write: TypedFunc<(i32, i32, i32, i32), i32>,
    fs_read: TypedFunc<(i32, i32), i64>,
    fs_unlink: TypedFunc<(i32, i32), i32>,
    load_model: TypedFunc<(i32, i32), i32>,
    save_model: TypedFunc<(i32, i32), i32>,
    dimension: TypedFunc<(), i32>,
    is_quant: TypedFunc<(), i32>,
    word_vector: TypedFunc<(i32, i32, i32, i32), i32>,
    sentence_vector: TypedFunc<(i32, i32, i32, i32), i32>,
    input_vector: TypedFunc<(i32, i32, i64), i32>,
    nearest_neighbors: TypedFunc<(i32, i32, i32), i32>,
    analogies: TypedFunc<(i32, i32, i32, i32, i32, i32, i32), i32>,
    predict: TypedFunc<(i32, i32, i32, f32), i32>,
    word_id: TypedFunc<(i32, i32), i64>,
    subword_id: TypedFunc<(i32, i32), i64>,
    subwords: TypedFunc<(i32, i32), i64>,
    words: TypedFunc<(), i64>,
    labels: TypedFunc<(), i64>,
    get_line: TypedFunc<(i32, i32), i64>,
    seq_len: TypedFunc<i32, i32>,
    seq_score_at: TypedFunc<(i32, i32), f32>,
    seq_str_at: TypedFunc<(i32, i32), i64>,
    seq_int_at: TypedFunc<(i32, i32), i64>,
    seq_clone: TypedFunc<i32, i32>,
    seq_dispose: TypedFunc<i32, i32>,
    matrix_rows: TypedFunc<i32, i64>,
    matrix_cols: TypedFunc<i32, i64>,
    matrix_at: TypedFunc<(i32, i64, i64), f32>,
}

/// [`TextEngine`] implementation backed by a hosted WebAssembly module.
pub struct WasmEngine {
    store: Store<()>,
    memory: Memory,
    exports: Exports,
    live: HashMap<u32, u32>,
    in_use: u64,
    metadata: Option<EngineMetadata>,
}

impl WasmEngine {
    /// Compiles and instantiates an engine module from its binary.
    pub fn from_module_bytes(wasm: &[u8]) -> BridgeResult<Self> {
        let engine = wasmtime::Engine::default();
        let module = Module::new(&engine, wasm)
            .map_err(|err| BridgeError::engine(format!("module compile failed: {err}")))?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])
            .map_err(|err| BridgeError::engine(format!("module instantiation failed: {err}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| BridgeError::engine("module exports no `memory`"))?;

        macro_rules! func {
            ($name:literal) => {
                instance.get_typed_func(&mut store, $name).map_err(|err| {
                    BridgeError::engine(format!("missing or mistyped export `{}`: {err}", $name))
                })?
            };
        }

        let exports = Exports {
            malloc: func!("vt_malloc"),
            free: func!("vt_free"),
            fs_write: func!("vt_fs_write"),
            fs_read: func!("vt_fs_read"),
            fs_unlink: func!("vt_fs_unlink"),
            load_model: func!("vt_load_model"),
            save_model: func!("vt_save_model"),
            dimension: func!("vt_dimension"),
            is_quant: func!("vt_is_quant"),
            word_vector: func!("vt_word_vector"),
            sentence_vector: func!("vt_sentence_vector"),
            input_vector: func!("vt_input_vector"),
            nearest_neighbors: func!("vt_nn"),
            analogies: func!("vt_analogies"),
            predict: func!("vt_predict"),
            word_id: func!("vt_word_id"),
            subword_id: func!("vt_subword_id"),
            subwords: func!("vt_subwords"),
            words: func!("vt_words"),
            labels: func!("vt_labels"),
            get_line: func!("vt_get_line"),
            seq_len: func!("vt_seq_len"),
            seq_score_at: func!("vt_seq_score_at"),
            seq_str_at: func!("vt_seq_str_at"),
            seq_int_at: func!("vt_seq_int_at"),
            seq_clone: func!("vt_seq_clone"),
            seq_dispose: func!("vt_seq_dispose"),
            matrix_rows: func!("vt_matrix_rows"),
            matrix_cols: func!("vt_matrix_cols"),
            matrix_at: func!("vt_matrix_at"),
        };

        info!("wasm engine module instantiated");
        Ok(Self {
            store,
            memory,
            exports,
            live: HashMap::new(),
            in_use: 0,
            metadata: None,
        })
    }

    /// Allocates guest memory and copies `bytes` into it. The caller must
    /// `unstage` the returned pointer on every path.
    fn stage(&mut self, bytes: &[u8]) -> BridgeResult<i32> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| BridgeError::engine("staged payload exceeds guest address space"))?;
        let ptr = self
            .exports
            .malloc
            .call(&mut self.store, len.max(1))
            .map_err(|err| call_error(err, "vt_malloc"))?;
        if ptr == 0 {
            return Err(BridgeError::out_of_memory(bytes.len() as u64));
        }
        self.memory
            .write(&mut self.store, ptr as usize, bytes)
            .map_err(|err| BridgeError::engine(format!("guest memory write failed: {err}")))?;
        Ok(ptr)
    }

    fn unstage(&mut self, ptr: i32) {
        // Staging allocations are engine-internal bookkeeping; a failed free
        // here is a trap and surfaces on the next real call.
        let _ = self.exports.free.call(&mut self.store, ptr);
    }

    /// Runs `op` with a staged copy of `bytes`, unstaging on every path.
    fn with_staged<T>(
        &mut self,
        bytes: &[u8],
        op: impl FnOnce(&mut Self, i32, i32) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        let ptr = self.stage(bytes)?;
        let result = op(self, ptr, bytes.len() as i32);
        self.unstage(ptr);
        result
    }

    /// Reads and frees a guest-allocated string from a packed ptr/len pair.
    fn take_guest_string(&mut self, packed: i64) -> BridgeResult<String> {
        if packed < 0 {
            return Err(rc_error(packed, "string access"));
        }
        let (ptr, len) = unpack(packed);
        let mut raw = vec![0u8; len as usize];
        self.memory
            .read(&self.store, ptr as usize, &mut raw)
            .map_err(|err| BridgeError::engine(format!("guest memory read failed: {err}")))?;
        self.unstage(ptr as i32);
        String::from_utf8(raw)
            .map_err(|_| BridgeError::engine("guest returned invalid UTF-8"))
    }

    fn handle_pair(&mut self, packed: i64, context: &str) -> BridgeResult<(SeqHandle, SeqHandle)> {
        if packed < 0 {
            return Err(rc_error(packed, context));
        }
        let (first, second) = unpack(packed);
        Ok((first, second))
    }

    fn check_rc(code: i32, context: &str) -> BridgeResult<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(rc_error(i64::from(code), context))
        }
    }

    fn check_handle(code: i32, context: &str) -> BridgeResult<SeqHandle> {
        if code >= 0 {
            Ok(code as SeqHandle)
        } else {
            Err(rc_error(i64::from(code), context))
        }
    }

    /// Drains a packed (strings, ints) handle pair into host arrays and
    /// disposes both containers.
    fn drain_pair(&mut self, packed: i64, context: &str) -> BridgeResult<(Vec<String>, Vec<i64>)> {
        let (strings, ints) = self.handle_pair(packed, context)?;
        let result = (|| {
            let len = self.seq_len(strings)?;
            let mut tokens = Vec::with_capacity(len as usize);
            let mut ids = Vec::with_capacity(len as usize);
            for i in 0..len {
                tokens.push(self.seq_string_at(strings, i)?);
                ids.push(self.seq_int_at(ints, i)?);
            }
            Ok((tokens, ids))
        })();
        let _ = self.seq_dispose(strings);
        let _ = self.seq_dispose(ints);
        result
    }
}

impl TextEngine for WasmEngine {
    fn malloc(&mut self, bytes: u32) -> BridgeResult<u32> {
        let ptr = self
            .exports
            .malloc
            .call(&mut self.store, bytes as i32)
            .map_err(|err| call_error(err, "vt_malloc"))?;
        if ptr == 0 {
            return Err(BridgeError::out_of_memory(u64::from(bytes)));
        }
        self.live.insert(ptr as u32, bytes);
        self.in_use += u64::from(bytes);
        Ok(ptr as u32)
    }

    fn free(&mut self, ptr: u32) -> BridgeResult<()> {
        let size = self
            .live
            .remove(&ptr)
            .ok_or_else(|| BridgeError::engine(format!("free of unallocated address {ptr}")))?;
        self.in_use -= u64::from(size);
        self.exports
            .free
            .call(&mut self.store, ptr as i32)
            .map_err(|err| call_error(err, "vt_free"))
    }

    fn peek(&self, ptr: u32, out: &mut [u8]) -> BridgeResult<()> {
        self.memory
            .read(&self.store, ptr as usize, out)
            .map_err(|err| BridgeError::engine(format!("guest memory read failed: {err}")))
    }

    fn poke(&mut self, ptr: u32, data: &[u8]) -> BridgeResult<()> {
        self.memory
            .write(&mut self.store, ptr as usize, data)
            .map_err(|err| BridgeError::engine(format!("guest memory write failed: {err}")))
    }

    fn arena_in_use(&self) -> u64 {
        self.in_use
    }

    fn write_file(&mut self, path: &str, bytes: &[u8]) -> BridgeResult<()> {
        let data_ptr = self.stage(bytes)?;
        let data_len = bytes.len() as i32;
        let result = self.with_staged(path.as_bytes(), |this, path_ptr, path_len| {
            let rc = this
                .exports
                .fs_write
                .call(&mut this.store, (path_ptr, path_len, data_ptr, data_len))
                .map_err(|err| call_error(err, "vt_fs_write"))?;
            Self::check_rc(rc, "vt_fs_write")
        });
        self.unstage(data_ptr);
        result
    }

    fn read_file(&mut self, path: &str) -> BridgeResult<Vec<u8>> {
        let packed = self.with_staged(path.as_bytes(), |this, ptr, len| {
            this.exports
                .fs_read
                .call(&mut this.store, (ptr, len))
                .map_err(|err| call_error(err, "vt_fs_read"))
        })?;
        if packed < 0 {
            return Err(rc_error(packed, "vt_fs_read"));
        }
        let (ptr, len) = unpack(packed);
        let mut raw = vec![0u8; len as usize];
        self.memory
            .read(&self.store, ptr as usize, &mut raw)
            .map_err(|err| BridgeError::engine(format!("guest memory read failed: {err}")))?;
        self.unstage(ptr as i32);
        Ok(raw)
    }

    fn unlink(&mut self, path: &str) -> BridgeResult<()> {
        self.with_staged(path.as_bytes(), |this, ptr, len| {
            let rc = this
                .exports
                .fs_unlink
                .call(&mut this.store, (ptr, len))
                .map_err(|err| call_error(err, "vt_fs_unlink"))?;
            Self::check_rc(rc, "vt_fs_unlink")
        })
    }

    fn load_model(&mut self, path: &str) -> BridgeResult<()> {
        self.with_staged(path.as_bytes(), |this, ptr, len| {
            let rc = this
                .exports
                .load_model
                .call(&mut this.store, (ptr, len))
                .map_err(|err| call_error(err, "vt_load_model"))?;
            Self::check_rc(rc, "vt_load_model")
        })?;

        let dimension = self
            .exports
            .dimension
            .call(&mut self.store, ())
            .map_err(|err| call_error(err, "vt_dimension"))?;
        let quant = self
            .exports
            .is_quant
            .call(&mut self.store, ())
            .map_err(|err| call_error(err, "vt_is_quant"))?;
        if dimension <= 0 || quant < 0 {
            return Err(BridgeError::model_load("engine reported invalid metadata"));
        }
        self.metadata = Some(EngineMetadata {
            dimension: dimension as u32,
            quantized: quant != 0,
        });
        Ok(())
    }

    fn save_model(&mut self, path: &str) -> BridgeResult<()> {
        self.with_staged(path.as_bytes(), |this, ptr, len| {
            let rc = this
                .exports
                .save_model
                .call(&mut this.store, (ptr, len))
                .map_err(|err| call_error(err, "vt_save_model"))?;
            Self::check_rc(rc, "vt_save_model")
        })
    }

    fn metadata(&self) -> BridgeResult<EngineMetadata> {
        self.metadata.ok_or(BridgeError::ModelNotLoaded)
    }

    fn word_vector(&mut self, slot: ScratchRef, word: &str) -> BridgeResult<()> {
        self.with_staged(word.as_bytes(), |this, ptr, len| {
            let rc = this
                .exports
                .word_vector
                .call(
                    &mut this.store,
                    (slot.ptr as i32, slot.len as i32, ptr, len),
                )
                .map_err(|err| call_error(err, "vt_word_vector"))?;
            Self::check_rc(rc, "vt_word_vector")
        })
    }

    fn sentence_vector(&mut self, slot: ScratchRef, text: &str) -> BridgeResult<()> {
        self.with_staged(text.as_bytes(), |this, ptr, len| {
            let rc = this
                .exports
                .sentence_vector
                .call(
                    &mut this.store,
                    (slot.ptr as i32, slot.len as i32, ptr, len),
                )
                .map_err(|err| call_error(err, "vt_sentence_vector"))?;
            Self::check_rc(rc, "vt_sentence_vector")
        })
    }

    fn input_vector(&mut self, slot: ScratchRef, row: u64) -> BridgeResult<()> {
        let rc = self
            .exports
            .input_vector
            .call(
                &mut self.store,
                (slot.ptr as i32, slot.len as i32, row as i64),
            )
            .map_err(|err| call_error(err, "vt_input_vector"))?;
        Self::check_rc(rc, "vt_input_vector")
    }

    fn nearest_neighbors(&mut self, word: &str, k: u32) -> BridgeResult<SeqHandle> {
        self.with_staged(word.as_bytes(), |this, ptr, len| {
            let handle = this
                .exports
                .nearest_neighbors
                .call(&mut this.store, (ptr, len, k as i32))
                .map_err(|err| call_error(err, "vt_nn"))?;
            Self::check_handle(handle, "vt_nn")
        })
    }

    fn analogies(
        &mut self,
        k: u32,
        word_a: &str,
        word_b: &str,
        word_c: &str,
    ) -> BridgeResult<SeqHandle> {
        let a = self.stage(word_a.as_bytes())?;
        let b = match self.stage(word_b.as_bytes()) {
            Ok(b) => b,
            Err(err) => {
                self.unstage(a);
                return Err(err);
            }
        };
        let c = match self.stage(word_c.as_bytes()) {
            Ok(c) => c,
            Err(err) => {
                self.unstage(a);
                self.unstage(b);
                return Err(err);
            }
        };

        let result = self
            .exports
            .analogies
            .call(
                &mut self.store,
                (
                    k as i32,
                    a,
                    word_a.len() as i32,
                    b,
                    word_b.len() as i32,
                    c,
                    word_c.len() as i32,
                ),
            )
            .map_err(|err| call_error(err, "vt_analogies"));

        self.unstage(a);
        self.unstage(b);
        self.unstage(c);
        Self::check_handle(result?, "vt_analogies")
    }

    fn predict(&mut self, text: &str, k: u32, threshold: f32) -> BridgeResult<SeqHandle> {
        self.with_staged(text.as_bytes(), |this, ptr, len| {
            let handle = this
                .exports
                .predict
                .call(&mut this.store, (ptr, len, k as i32, threshold))
                .map_err(|err| call_error(err, "vt_predict"))?;
            Self::check_handle(handle, "vt_predict")
        })
    }

    fn word_id(&mut self, word: &str) -> BridgeResult<i64> {
        self.with_staged(word.as_bytes(), |this, ptr, len| {
            this.exports
                .word_id
                .call(&mut this.store, (ptr, len))
                .map_err(|err| call_error(err, "vt_word_id"))
        })
    }

    fn subword_id(&mut self, subword: &str) -> BridgeResult<i64> {
        self.with_staged(subword.as_bytes(), |this, ptr, len| {
            this.exports
                .subword_id
                .call(&mut this.store, (ptr, len))
                .map_err(|err| call_error(err, "vt_subword_id"))
        })
    }

    fn subwords(&mut self, word: &str) -> BridgeResult<(Vec<String>, Vec<i64>)> {
        let packed = self.with_staged(word.as_bytes(), |this, ptr, len| {
            this.exports
                .subwords
                .call(&mut this.store, (ptr, len))
                .map_err(|err| call_error(err, "vt_subwords"))
        })?;
        self.drain_pair(packed, "vt_subwords")
    }

    fn words(&mut self) -> BridgeResult<(SeqHandle, SeqHandle)> {
        let packed = self
            .exports
            .words
            .call(&mut self.store, ())
            .map_err(|err| call_error(err, "vt_words"))?;
        self.handle_pair(packed, "vt_words")
    }

    fn labels(&mut self) -> BridgeResult<(SeqHandle, SeqHandle)> {
        let packed = self
            .exports
            .labels
            .call(&mut self.store, ())
            .map_err(|err| call_error(err, "vt_labels"))?;
        self.handle_pair(packed, "vt_labels")
    }

    fn tokenize_line(&mut self, text: &str) -> BridgeResult<(SeqHandle, SeqHandle)> {
        let packed = self.with_staged(text.as_bytes(), |this, ptr, len| {
            this.exports
                .get_line
                .call(&mut this.store, (ptr, len))
                .map_err(|err| call_error(err, "vt_get_line"))
        })?;
        self.handle_pair(packed, "vt_get_line")
    }

    fn seq_len(&mut self, handle: SeqHandle) -> BridgeResult<u32> {
        let len = self
            .exports
            .seq_len
            .call(&mut self.store, handle as i32)
            .map_err(|err| call_error(err, "vt_seq_len"))?;
        if len < 0 {
            return Err(rc_error(i64::from(len), "vt_seq_len"));
        }
        Ok(len as u32)
    }

    fn seq_scored_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<(f32, String)> {
        // Value-returning export: validate the index host-side first.
        let len = self.seq_len(handle)?;
        if index >= len {
            return Err(BridgeError::engine(format!(
                "element {index} past container end"
            )));
        }
        let score = self
            .exports
            .seq_score_at
            .call(&mut self.store, (handle as i32, index as i32))
            .map_err(|err| call_error(err, "vt_seq_score_at"))?;
        let packed = self
            .exports
            .seq_str_at
            .call(&mut self.store, (handle as i32, index as i32))
            .map_err(|err| call_error(err, "vt_seq_str_at"))?;
        let label = self.take_guest_string(packed)?;
        Ok((score, label))
    }

    fn seq_string_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<String> {
        let packed = self
            .exports
            .seq_str_at
            .call(&mut self.store, (handle as i32, index as i32))
            .map_err(|err| call_error(err, "vt_seq_str_at"))?;
        self.take_guest_string(packed)
    }

    fn seq_int_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<i64> {
        let value = self
            .exports
            .seq_int_at
            .call(&mut self.store, (handle as i32, index as i32))
            .map_err(|err| call_error(err, "vt_seq_int_at"))?;
        Ok(value)
    }

    fn seq_clone(&mut self, handle: SeqHandle) -> BridgeResult<SeqHandle> {
        let copy = self
            .exports
            .seq_clone
            .call(&mut self.store, handle as i32)
            .map_err(|err| call_error(err, "vt_seq_clone"))?;
        Self::check_handle(copy, "vt_seq_clone")
    }

    fn seq_dispose(&mut self, handle: SeqHandle) -> BridgeResult<()> {
        let rc = self
            .exports
            .seq_dispose
            .call(&mut self.store, handle as i32)
            .map_err(|err| call_error(err, "vt_seq_dispose"))?;
        Self::check_rc(rc, "vt_seq_dispose")
    }

    fn matrix_dims(&mut self, kind: MatrixKind) -> BridgeResult<(u64, u64)> {
        let which = match kind {
            MatrixKind::Input => 0,
            MatrixKind::Output => 1,
        };
        let rows = self
            .exports
            .matrix_rows
            .call(&mut self.store, which)
            .map_err(|err| call_error(err, "vt_matrix_rows"))?;
        if rows < 0 {
            return Err(rc_error(rows, "vt_matrix_rows"));
        }
        let cols = self
            .exports
            .matrix_cols
            .call(&mut self.store, which)
            .map_err(|err| call_error(err, "vt_matrix_cols"))?;
        if cols < 0 {
            return Err(rc_error(cols, "vt_matrix_cols"));
        }
        Ok((rows as u64, cols as u64))
    }

    fn matrix_at(&mut self, kind: MatrixKind, row: u64, col: u64) -> BridgeResult<f32> {
        // Value-returning export: validate bounds host-side first.
        let (rows, cols) = self.matrix_dims(kind)?;
        if row >= rows || col >= cols {
            return Err(BridgeError::engine(format!(
                "cell ({row}, {col}) out of range for {rows}x{cols} matrix"
            )));
        }
        let which = match kind {
            MatrixKind::Input => 0,
            MatrixKind::Output => 1,
        };
        self.exports
            .matrix_at
            .call(&mut self.store, (which, row as i64, col as i64))
            .map_err(|err| call_error(err, "vt_matrix_at"))
    }
}
