//! The public model facade.
//!
//! Every operation stages its inputs, invokes the engine through the shared
//! handle, and drains results through the buffer bridge or a container
//! adapter. Loading is the only asynchronous surface, and only for the byte
//! retrieval phase; the engine parse itself is synchronous and blocking.

use std::borrow::Cow;
use std::path::PathBuf;

use tracing::debug;
use vectext_core::{BridgeConfig, BridgeError, BridgeResult, MatrixKind, ModelInfo};
use vectext_engine::{
    LineTokens, ScoredResults, ScratchBuffer, ScratchRef, SharedEngine, TextEngine, VocabList,
};
use vectext_langid::Language;

use crate::handle::ModelHandle;
use crate::matrix::DenseMatrixView;

/// Default neighbor count for similarity queries.
pub const DEFAULT_NEIGHBORS: u32 = 10;

/// Where model bytes come from.
///
/// Path retrieval is the phase that may suspend; in-memory bytes load
/// without touching the filesystem.
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Serialized model already in host memory.
    Bytes(Vec<u8>),
    /// Serialized model on the host filesystem.
    Path(PathBuf),
}

impl From<Vec<u8>> for ModelSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Tuning knobs for `predict`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictOptions {
    /// Maximum number of predictions to return.
    pub k: u32,
    /// Minimum probability; entries below are excluded by the engine.
    pub threshold: f32,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            k: 1,
            threshold: 0.0,
        }
    }
}

/// Typed facade over a loaded text model.
pub struct TextModel {
    handle: ModelHandle,
    config: BridgeConfig,
}

impl TextModel {
    /// Creates an unloaded facade with default configuration.
    #[must_use]
    pub fn new(engine: SharedEngine) -> Self {
        Self::with_config(engine, BridgeConfig::default())
    }

    /// Creates an unloaded facade with explicit configuration.
    #[must_use]
    pub fn with_config(engine: SharedEngine, config: BridgeConfig) -> Self {
        Self {
            handle: ModelHandle::new(engine),
            config,
        }
    }

    /// Resolves the model source and loads it into the engine.
    ///
    /// Byte retrieval may suspend; the engine parse is synchronous. On
    /// failure the handle stays unusable and every other operation keeps
    /// failing with `ModelNotLoaded`.
    pub async fn load(&mut self, source: impl Into<ModelSource>) -> BridgeResult<ModelInfo> {
        let bytes = match source.into() {
            ModelSource::Bytes(bytes) => bytes,
            ModelSource::Path(path) => tokio::fs::read(&path).await?,
        };
        self.handle.load(&bytes, &self.config.model_path)
    }

    /// Whether the loaded model is quantized.
    pub fn is_quant(&self) -> BridgeResult<bool> {
        Ok(self.handle.info()?.quantized)
    }

    /// Dimension (size) of a lookup vector.
    pub fn dimension(&self) -> BridgeResult<u32> {
        Ok(self.handle.info()?.dimension)
    }

    /// Acquire → fill → readback → release, with the guard covering every
    /// early exit.
    fn fill_vector(
        &self,
        fill: impl FnOnce(&mut dyn TextEngine, ScratchRef) -> BridgeResult<()>,
    ) -> BridgeResult<Vec<f32>> {
        let info = self.handle.info()?;
        let buf = ScratchBuffer::acquire(self.handle.engine(), info.dimension)?;
        fill(&mut *self.handle.engine().lock(), buf.slot())?;
        let values = buf.readback()?;
        buf.release()?;
        Ok(values)
    }

    /// The vector representation of `word`.
    pub fn word_vector(&self, word: &str) -> BridgeResult<Vec<f32>> {
        self.fill_vector(|engine, slot| engine.word_vector(slot, word))
    }

    /// The vector representation of a single line of text.
    ///
    /// The engine tokenizer is line-based, so a trailing line terminator is
    /// appended when absent; text that already ends in one passes through
    /// unchanged.
    pub fn sentence_vector(&self, text: &str) -> BridgeResult<Vec<f32>> {
        let line: Cow<'_, str> = if text.ends_with('\n') {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(format!("{text}\n"))
        };
        self.fill_vector(|engine, slot| engine.sentence_vector(slot, &line))
    }

    /// Row `row` of the input matrix.
    pub fn input_vector(&self, row: u64) -> BridgeResult<Vec<f32>> {
        self.fill_vector(|engine, slot| engine.input_vector(slot, row))
    }

    /// The nearest `k` neighbors of `word` with cosine similarities,
    /// descending. [`DEFAULT_NEIGHBORS`] is the conventional `k`.
    pub fn nearest_neighbors(&self, word: &str, k: u32) -> BridgeResult<ScoredResults> {
        self.handle.info()?;
        let handle = self.handle.engine().lock().nearest_neighbors(word, k)?;
        ScoredResults::wrap(self.handle.engine().clone(), handle)
    }

    /// The nearest `k` neighbors of `vector(a) - vector(b) + vector(c)`.
    pub fn analogies(
        &self,
        word_a: &str,
        word_b: &str,
        word_c: &str,
        k: u32,
    ) -> BridgeResult<ScoredResults> {
        self.handle.info()?;
        let handle = self
            .handle
            .engine()
            .lock()
            .analogies(k, word_a, word_b, word_c)?;
        ScoredResults::wrap(self.handle.engine().clone(), handle)
    }

    /// Label predictions for `text`, ranked by probability.
    ///
    /// The caller owns the returned container and its disposal.
    pub fn predict(&self, text: &str, options: PredictOptions) -> BridgeResult<ScoredResults> {
        self.handle.info()?;
        let handle = self
            .handle
            .engine()
            .lock()
            .predict(text, options.k, options.threshold)?;
        ScoredResults::wrap(self.handle.engine().clone(), handle)
    }

    /// Dictionary id of `word`, or `-1` when it is not in the dictionary.
    pub fn word_id(&self, word: &str) -> BridgeResult<i64> {
        self.handle.info()?;
        self.handle.engine().lock().word_id(word)
    }

    /// Input-matrix row `subword` hashes to, or `-1` for an empty subword.
    pub fn subword_id(&self, subword: &str) -> BridgeResult<i64> {
        self.handle.info()?;
        self.handle.engine().lock().subword_id(subword)
    }

    /// The subwords of `word` and the rows they hash to.
    pub fn subwords(&self, word: &str) -> BridgeResult<(Vec<String>, Vec<i64>)> {
        self.handle.info()?;
        self.handle.engine().lock().subwords(word)
    }

    /// The dictionary words with their counts.
    pub fn words(&self) -> BridgeResult<VocabList> {
        self.handle.info()?;
        let (tokens, counts) = self.handle.engine().lock().words()?;
        VocabList::wrap(self.handle.engine().clone(), tokens, counts)
    }

    /// The dictionary labels with their counts.
    pub fn labels(&self) -> BridgeResult<VocabList> {
        self.handle.info()?;
        let (tokens, counts) = self.handle.engine().lock().labels()?;
        VocabList::wrap(self.handle.engine().clone(), tokens, counts)
    }

    /// Splits a line of text into its word tokens and label tokens.
    pub fn get_line(&self, text: &str) -> BridgeResult<LineTokens> {
        self.handle.info()?;
        let (words, labels) = self.handle.engine().lock().tokenize_line(text)?;
        LineTokens::wrap(self.handle.engine().clone(), words, labels)
    }

    fn matrix(&self, kind: MatrixKind) -> BridgeResult<DenseMatrixView> {
        // Reject before any engine access; quantized models have no dense
        // matrices to expose.
        if self.handle.info()?.quantized {
            return Err(BridgeError::QuantizedModel);
        }
        DenseMatrixView::open(self.handle.engine().clone(), kind)
    }

    /// A read-only view of the input matrix. Not available on quantized
    /// models.
    pub fn input_matrix(&self) -> BridgeResult<DenseMatrixView> {
        self.matrix(MatrixKind::Input)
    }

    /// A read-only view of the output matrix. Not available on quantized
    /// models.
    pub fn output_matrix(&self) -> BridgeResult<DenseMatrixView> {
        self.matrix(MatrixKind::Output)
    }

    /// Serializes the loaded model back to host bytes.
    pub fn save_model(&self) -> BridgeResult<Vec<u8>> {
        self.handle.info()?;
        let mut engine = self.handle.engine().lock();
        engine.save_model(&self.config.model_path)?;
        engine.read_file(&self.config.model_path)
    }

    /// Identifies the language of `text` from its top prediction.
    ///
    /// Returns `None` when the model produces no prediction or the predicted
    /// code is not in the metadata table. The intermediate container is
    /// disposed here; nothing engine-owned escapes.
    pub fn identify(&self, text: &str) -> BridgeResult<Option<Language>> {
        let mut results = self.predict(text, PredictOptions::default())?;
        let resolved = if results.is_empty() {
            None
        } else {
            let top = results.get(0)?;
            debug!(label = %top.label, score = top.score, "top language prediction");
            vectext_langid::resolve_label(&top.label, &self.config.label_prefix).cloned()
        };
        results.dispose()?;
        Ok(resolved)
    }
}
