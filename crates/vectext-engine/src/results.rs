//! Adapters over engine-owned result containers.
//!
//! Ranked and dictionary operations hand back handles to sequences living in
//! engine memory. These wrappers expose bounds-checked accessors and enforce
//! the single-dispose rule: one `dispose` per container, access after
//! disposal rejected, and a destructor backstop so an adapter the caller
//! forgot to dispose still returns its engine memory.
//!
//! Ordering is whatever the engine produced. Ranked sequences arrive in
//! descending score order with engine-internal tie order; the adapters never
//! re-sort.

use std::sync::Arc;

use tracing::warn;
use vectext_core::{BridgeError, BridgeResult, ScoredLabel};

use crate::traits::{SeqHandle, SharedEngine};

fn dispose_handle(engine: &SharedEngine, handle: SeqHandle, what: &str) {
    if let Err(err) = engine.lock().seq_dispose(handle) {
        warn!(handle, %err, "{what} dispose failed in destructor");
    }
}

/// A ranked sequence of (score, label) pairs owned by the engine.
pub struct ScoredResults {
    engine: SharedEngine,
    handle: SeqHandle,
    len: u32,
    disposed: bool,
}

impl ScoredResults {
    /// Wraps an engine handle, caching the sequence length.
    ///
    /// If the length query fails the handle is disposed best-effort before
    /// the error propagates, so a half-built adapter never leaks.
    pub fn wrap(engine: SharedEngine, handle: SeqHandle) -> BridgeResult<Self> {
        let len = match engine.lock().seq_len(handle) {
            Ok(len) => len,
            Err(err) => {
                let _ = engine.lock().seq_dispose(handle);
                return Err(err);
            }
        };
        Ok(Self {
            engine,
            handle,
            len,
            disposed: false,
        })
    }

    fn live(&self) -> BridgeResult<()> {
        if self.disposed {
            return Err(BridgeError::DisposedContainer);
        }
        Ok(())
    }

    /// Number of results.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The result at `index`.
    ///
    /// # Errors
    ///
    /// `IndexOutOfRange` outside `[0, len)`; `DisposedContainer` after
    /// `dispose`.
    pub fn get(&self, index: u32) -> BridgeResult<ScoredLabel> {
        self.live()?;
        if index >= self.len {
            return Err(BridgeError::index_out_of_range(
                u64::from(index),
                u64::from(self.len),
            ));
        }
        let (score, label) = self.engine.lock().seq_scored_at(self.handle, index)?;
        Ok(ScoredLabel::new(score, label))
    }

    /// Drains every result into a host vector, preserving order.
    pub fn to_vec(&self) -> BridgeResult<Vec<ScoredLabel>> {
        (0..self.len).map(|i| self.get(i)).collect()
    }

    /// Allocates an independent engine container with the same contents.
    ///
    /// The clone must be disposed separately.
    pub fn try_clone(&self) -> BridgeResult<Self> {
        self.live()?;
        let handle = self.engine.lock().seq_clone(self.handle)?;
        Ok(Self {
            engine: Arc::clone(&self.engine),
            handle,
            len: self.len,
            disposed: false,
        })
    }

    /// Releases the engine container.
    ///
    /// # Errors
    ///
    /// `DisposedContainer` if called twice.
    pub fn dispose(&mut self) -> BridgeResult<()> {
        self.live()?;
        self.disposed = true;
        self.engine.lock().seq_dispose(self.handle)
    }
}

impl Drop for ScoredResults {
    fn drop(&mut self) {
        if !self.disposed {
            dispose_handle(&self.engine, self.handle, "scored results");
        }
    }
}

/// A parallel (token, count) dictionary listing owned by the engine.
///
/// Backed by two same-length engine sequences; both are disposed together.
pub struct VocabList {
    engine: SharedEngine,
    tokens: SeqHandle,
    counts: SeqHandle,
    len: u32,
    disposed: bool,
}

impl VocabList {
    /// Wraps the paired handles, verifying they are parallel.
    ///
    /// Both handles are disposed best-effort when construction fails, so a
    /// mismatched pair never leaks.
    pub fn wrap(engine: SharedEngine, tokens: SeqHandle, counts: SeqHandle) -> BridgeResult<Self> {
        let lens = {
            let mut guard = engine.lock();
            guard
                .seq_len(tokens)
                .and_then(|len| Ok((len, guard.seq_len(counts)?)))
        };
        match lens {
            Ok((len, counts_len)) if counts_len == len => Ok(Self {
                engine,
                tokens,
                counts,
                len,
                disposed: false,
            }),
            Ok((len, counts_len)) => {
                let mut guard = engine.lock();
                let _ = guard.seq_dispose(tokens);
                let _ = guard.seq_dispose(counts);
                Err(BridgeError::engine(format!(
                    "paired containers disagree on length: {len} tokens, {counts_len} counts"
                )))
            }
            Err(err) => {
                let mut guard = engine.lock();
                let _ = guard.seq_dispose(tokens);
                let _ = guard.seq_dispose(counts);
                Err(err)
            }
        }
    }

    fn live(&self) -> BridgeResult<()> {
        if self.disposed {
            return Err(BridgeError::DisposedContainer);
        }
        Ok(())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the listing is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The (token, count) entry at `index`.
    pub fn get(&self, index: u32) -> BridgeResult<(String, i64)> {
        self.live()?;
        if index >= self.len {
            return Err(BridgeError::index_out_of_range(
                u64::from(index),
                u64::from(self.len),
            ));
        }
        let mut engine = self.engine.lock();
        let token = engine.seq_string_at(self.tokens, index)?;
        let count = engine.seq_int_at(self.counts, index)?;
        Ok((token, count))
    }

    /// Allocates independent engine containers with the same contents.
    pub fn try_clone(&self) -> BridgeResult<Self> {
        self.live()?;
        let mut engine = self.engine.lock();
        let tokens = engine.seq_clone(self.tokens)?;
        let counts = match engine.seq_clone(self.counts) {
            Ok(counts) => counts,
            Err(err) => {
                // Keep the pair atomic: do not leak the half-made clone.
                let _ = engine.seq_dispose(tokens);
                return Err(err);
            }
        };
        drop(engine);
        Ok(Self {
            engine: Arc::clone(&self.engine),
            tokens,
            counts,
            len: self.len,
            disposed: false,
        })
    }

    /// Releases both engine containers.
    pub fn dispose(&mut self) -> BridgeResult<()> {
        self.live()?;
        self.disposed = true;
        let mut engine = self.engine.lock();
        let first = engine.seq_dispose(self.tokens);
        let second = engine.seq_dispose(self.counts);
        first.and(second)
    }
}

impl Drop for VocabList {
    fn drop(&mut self) {
        if !self.disposed {
            dispose_handle(&self.engine, self.tokens, "vocab tokens");
            dispose_handle(&self.engine, self.counts, "vocab counts");
        }
    }
}

/// The word and label tokens of one split line, owned by the engine.
///
/// The two sequences are independently sized.
pub struct LineTokens {
    engine: SharedEngine,
    words: SeqHandle,
    labels: SeqHandle,
    words_len: u32,
    labels_len: u32,
    disposed: bool,
}

impl LineTokens {
    /// Wraps the word and label handles produced by a line split.
    ///
    /// Both handles are disposed best-effort when construction fails.
    pub fn wrap(engine: SharedEngine, words: SeqHandle, labels: SeqHandle) -> BridgeResult<Self> {
        let lens = {
            let mut guard = engine.lock();
            guard
                .seq_len(words)
                .and_then(|len| Ok((len, guard.seq_len(labels)?)))
        };
        match lens {
            Ok((words_len, labels_len)) => Ok(Self {
                engine,
                words,
                labels,
                words_len,
                labels_len,
                disposed: false,
            }),
            Err(err) => {
                let mut guard = engine.lock();
                let _ = guard.seq_dispose(words);
                let _ = guard.seq_dispose(labels);
                Err(err)
            }
        }
    }

    fn live(&self) -> BridgeResult<()> {
        if self.disposed {
            return Err(BridgeError::DisposedContainer);
        }
        Ok(())
    }

    /// Number of word tokens.
    #[must_use]
    pub fn words_len(&self) -> u32 {
        self.words_len
    }

    /// Number of label tokens.
    #[must_use]
    pub fn labels_len(&self) -> u32 {
        self.labels_len
    }

    /// The word token at `index`.
    pub fn word_at(&self, index: u32) -> BridgeResult<String> {
        self.live()?;
        if index >= self.words_len {
            return Err(BridgeError::index_out_of_range(
                u64::from(index),
                u64::from(self.words_len),
            ));
        }
        self.engine.lock().seq_string_at(self.words, index)
    }

    /// The label token at `index`.
    pub fn label_at(&self, index: u32) -> BridgeResult<String> {
        self.live()?;
        if index >= self.labels_len {
            return Err(BridgeError::index_out_of_range(
                u64::from(index),
                u64::from(self.labels_len),
            ));
        }
        self.engine.lock().seq_string_at(self.labels, index)
    }

    /// Releases both engine containers.
    pub fn dispose(&mut self) -> BridgeResult<()> {
        self.live()?;
        self.disposed = true;
        let mut engine = self.engine.lock();
        let first = engine.seq_dispose(self.words);
        let second = engine.seq_dispose(self.labels);
        first.and(second)
    }
}

impl Drop for LineTokens {
    fn drop(&mut self) {
        if !self.disposed {
            dispose_handle(&self.engine, self.words, "line words");
            dispose_handle(&self.engine, self.labels, "line labels");
        }
    }
}
