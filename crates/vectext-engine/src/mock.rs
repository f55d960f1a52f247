//! Deterministic in-process engine for tests and offline development.
//!
//! Implements the full [`TextEngine`] surface against a real [`Arena`], a
//! private in-memory filesystem, and a toy serialized model format, so every
//! marshaling path in the bridge is exercised exactly as it would be against
//! the native engine. All outputs are deterministic: known tokens use their
//! stored vectors, unknown tokens get hash-seeded vectors.
//!
//! [`ModelFixture`] builds serialized models for integration tests without
//! any ML dependencies.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use bytes::BufMut;
use tracing::debug;
use vectext_core::{BridgeError, BridgeResult, MatrixKind};

use crate::arena::Arena;
use crate::traits::{EngineMetadata, ScratchRef, SeqHandle, TextEngine};

const MODEL_MAGIC: [u8; 4] = *b"VXTM";
const MODEL_VERSION: u16 = 1;
const FLAG_QUANTIZED: u8 = 0b0000_0001;

/// Number of hash buckets for subword rows, appended after the vocabulary
/// rows of the input matrix.
const SUBWORD_BUCKETS: u64 = 2_000_000;

/// Character n-gram sizes considered subwords.
const MIN_SUBWORD: usize = 3;
const MAX_SUBWORD: usize = 6;

/// Softmax temperature applied to similarity scores in `predict`.
const SCORE_TEMPERATURE: f32 = 8.0;

const DEFAULT_ARENA_BYTES: u32 = 16 * 1024 * 1024;

/// One dictionary entry: a token, its corpus count, and its vector.
#[derive(Debug, Clone)]
struct Entry {
    token: String,
    count: i64,
    vector: Vec<f32>,
}

/// A parsed model.
#[derive(Debug, Clone)]
struct MockModel {
    dimension: u32,
    quantized: bool,
    label_prefix: String,
    vocab: Vec<Entry>,
    labels: Vec<Entry>,
    word_index: HashMap<String, usize>,
}

/// Engine-owned sequence containers, keyed by handle.
#[derive(Debug, Clone)]
enum SeqData {
    Scored(Vec<(f32, String)>),
    Strings(Vec<String>),
    Ints(Vec<i64>),
}

/// Deterministic vector derived from a token, for out-of-vocabulary lookups.
fn seeded_vector(seed_text: &str, dimension: u32) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    seed_text.hash(&mut hasher);
    let mut state = hasher.finish() | 1;

    (0..dimension)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let r = ((state >> 33) & 0xFFFF) as f32 / 65_536.0;
            r * 2.0 - 1.0
        })
        .collect()
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

// --- model format ---

fn take<'a>(buf: &mut &'a [u8], n: usize, what: &str) -> BridgeResult<&'a [u8]> {
    if buf.len() < n {
        return Err(BridgeError::model_load(format!("truncated model: {what}")));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_u16(buf: &mut &[u8], what: &str) -> BridgeResult<u16> {
    let raw = take(buf, 2, what)?;
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
}

fn take_u32(buf: &mut &[u8], what: &str) -> BridgeResult<u32> {
    let raw = take(buf, 4, what)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn take_i64(buf: &mut &[u8], what: &str) -> BridgeResult<i64> {
    let raw = take(buf, 8, what)?;
    let mut le = [0u8; 8];
    le.copy_from_slice(raw);
    Ok(i64::from_le_bytes(le))
}

fn take_string(buf: &mut &[u8], what: &str) -> BridgeResult<String> {
    let len = usize::from(take_u16(buf, what)?);
    let raw = take(buf, len, what)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| BridgeError::model_load(format!("invalid UTF-8 in {what}")))
}

fn take_entry(buf: &mut &[u8], dimension: u32, what: &str) -> BridgeResult<Entry> {
    let token = take_string(buf, what)?;
    let count = take_i64(buf, what)?;
    let raw = take(buf, dimension as usize * 4, what)?;
    let vector = raw
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Entry {
        token,
        count,
        vector,
    })
}

fn decode_model(bytes: &[u8]) -> BridgeResult<MockModel> {
    let mut buf = bytes;

    let magic = take(&mut buf, 4, "magic")?;
    if magic != MODEL_MAGIC {
        return Err(BridgeError::model_load("unrecognized model magic"));
    }
    let version = take_u16(&mut buf, "version")?;
    if version != MODEL_VERSION {
        return Err(BridgeError::model_load(format!(
            "unsupported model version {version}"
        )));
    }
    let flags = take(&mut buf, 1, "flags")?[0];
    let dimension = take_u32(&mut buf, "dimension")?;
    if dimension == 0 {
        return Err(BridgeError::model_load("dimension must be positive"));
    }
    let label_prefix = take_string(&mut buf, "label prefix")?;

    let vocab_len = take_u32(&mut buf, "vocab count")? as usize;
    let mut vocab = Vec::with_capacity(vocab_len.min(1 << 16));
    for _ in 0..vocab_len {
        vocab.push(take_entry(&mut buf, dimension, "vocab entry")?);
    }

    let label_len = take_u32(&mut buf, "label count")? as usize;
    let mut labels = Vec::with_capacity(label_len.min(1 << 16));
    for _ in 0..label_len {
        labels.push(take_entry(&mut buf, dimension, "label entry")?);
    }

    let word_index = vocab
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.token.clone(), i))
        .collect();

    Ok(MockModel {
        dimension,
        quantized: flags & FLAG_QUANTIZED != 0,
        label_prefix,
        vocab,
        labels,
        word_index,
    })
}

fn encode_entry(out: &mut Vec<u8>, entry: &Entry) {
    out.put_u16_le(entry.token.len() as u16);
    out.put_slice(entry.token.as_bytes());
    out.put_i64_le(entry.count);
    for value in &entry.vector {
        out.put_f32_le(*value);
    }
}

fn encode_model(model: &MockModel) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_slice(&MODEL_MAGIC);
    out.put_u16_le(MODEL_VERSION);
    out.put_u8(if model.quantized { FLAG_QUANTIZED } else { 0 });
    out.put_u32_le(model.dimension);
    out.put_u16_le(model.label_prefix.len() as u16);
    out.put_slice(model.label_prefix.as_bytes());

    out.put_u32_le(model.vocab.len() as u32);
    for entry in &model.vocab {
        encode_entry(&mut out, entry);
    }
    out.put_u32_le(model.labels.len() as u32);
    for entry in &model.labels {
        encode_entry(&mut out, entry);
    }
    out
}

// --- the engine ---

/// Deterministic in-process implementation of [`TextEngine`].
pub struct MockEngine {
    arena: Arena,
    files: HashMap<String, Vec<u8>>,
    model: Option<MockModel>,
    seqs: HashMap<SeqHandle, SeqData>,
    next_seq: SeqHandle,
}

impl MockEngine {
    /// Creates an engine with the default arena capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_arena_capacity(DEFAULT_ARENA_BYTES)
    }

    /// Creates an engine with a custom arena capacity, in bytes.
    #[must_use]
    pub fn with_arena_capacity(capacity: u32) -> Self {
        Self {
            arena: Arena::with_capacity(capacity),
            files: HashMap::new(),
            model: None,
            seqs: HashMap::new(),
            next_seq: 1,
        }
    }

    fn model(&self) -> BridgeResult<&MockModel> {
        self.model.as_ref().ok_or(BridgeError::ModelNotLoaded)
    }

    fn token_vector(model: &MockModel, token: &str) -> Vec<f32> {
        match model.word_index.get(token) {
            Some(i) => model.vocab[*i].vector.clone(),
            None => seeded_vector(token, model.dimension),
        }
    }

    /// Mean of the token vectors of the first line of `text`.
    fn line_vector(model: &MockModel, text: &str) -> Vec<f32> {
        let line = text.split('\n').next().unwrap_or("");
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut sum = vec![0.0f32; model.dimension as usize];
        if tokens.is_empty() {
            return sum;
        }
        for token in &tokens {
            for (acc, v) in sum.iter_mut().zip(Self::token_vector(model, token)) {
                *acc += v;
            }
        }
        let n = tokens.len() as f32;
        for acc in &mut sum {
            *acc /= n;
        }
        sum
    }

    fn check_slot(&self, slot: ScratchRef, dimension: u32) -> BridgeResult<()> {
        if slot.len != dimension {
            return Err(BridgeError::engine(format!(
                "scratch buffer holds {} elements, model dimension is {dimension}",
                slot.len
            )));
        }
        self.arena.check_allocation(slot.ptr, slot.byte_len())
    }

    fn alloc_seq(&mut self, data: SeqData) -> SeqHandle {
        let handle = self.next_seq;
        self.next_seq += 1;
        self.seqs.insert(handle, data);
        handle
    }

    fn seq(&self, handle: SeqHandle) -> BridgeResult<&SeqData> {
        self.seqs
            .get(&handle)
            .ok_or_else(|| BridgeError::engine(format!("unknown container handle {handle}")))
    }

    /// Ranked scored sequence: descending score, insertion order on ties.
    fn ranked(mut scored: Vec<(f32, String)>, k: u32) -> Vec<(f32, String)> {
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k as usize);
        scored
    }

    fn ranked_neighbors(
        model: &MockModel,
        query: &[f32],
        exclude: &[&str],
        k: u32,
    ) -> Vec<(f32, String)> {
        let scored: Vec<(f32, String)> = model
            .vocab
            .iter()
            .filter(|entry| !exclude.contains(&entry.token.as_str()))
            .map(|entry| (cosine(query, &entry.vector), entry.token.clone()))
            .collect();
        Self::ranked(scored, k)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TextEngine for MockEngine {
    fn malloc(&mut self, bytes: u32) -> BridgeResult<u32> {
        self.arena.alloc(bytes)
    }

    fn free(&mut self, ptr: u32) -> BridgeResult<()> {
        self.arena.free(ptr)
    }

    fn peek(&self, ptr: u32, out: &mut [u8]) -> BridgeResult<()> {
        self.arena.read(ptr, out)
    }

    fn poke(&mut self, ptr: u32, data: &[u8]) -> BridgeResult<()> {
        self.arena.write(ptr, data)
    }

    fn arena_in_use(&self) -> u64 {
        self.arena.in_use()
    }

    fn write_file(&mut self, path: &str, bytes: &[u8]) -> BridgeResult<()> {
        self.files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> BridgeResult<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| BridgeError::engine(format!("no file `{path}` in engine filesystem")))
    }

    fn unlink(&mut self, path: &str) -> BridgeResult<()> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BridgeError::engine(format!("no file `{path}` in engine filesystem")))
    }

    fn load_model(&mut self, path: &str) -> BridgeResult<()> {
        let bytes = self
            .files
            .get(path)
            .ok_or_else(|| BridgeError::model_load(format!("no staged model at `{path}`")))?;
        let model = decode_model(bytes)?;
        debug!(
            dimension = model.dimension,
            quantized = model.quantized,
            vocab = model.vocab.len(),
            labels = model.labels.len(),
            "mock engine parsed model"
        );
        self.model = Some(model);
        Ok(())
    }

    fn save_model(&mut self, path: &str) -> BridgeResult<()> {
        let bytes = encode_model(self.model()?);
        self.files.insert(path.to_string(), bytes);
        Ok(())
    }

    fn metadata(&self) -> BridgeResult<EngineMetadata> {
        let model = self.model()?;
        Ok(EngineMetadata {
            dimension: model.dimension,
            quantized: model.quantized,
        })
    }

    fn word_vector(&mut self, slot: ScratchRef, word: &str) -> BridgeResult<()> {
        let model = self.model()?;
        self.check_slot(slot, model.dimension)?;
        let vector = Self::token_vector(model, word);
        self.arena.write_f32s(slot.ptr, &vector)
    }

    fn sentence_vector(&mut self, slot: ScratchRef, text: &str) -> BridgeResult<()> {
        let model = self.model()?;
        self.check_slot(slot, model.dimension)?;
        let vector = Self::line_vector(model, text);
        self.arena.write_f32s(slot.ptr, &vector)
    }

    fn input_vector(&mut self, slot: ScratchRef, row: u64) -> BridgeResult<()> {
        let model = self.model()?;
        self.check_slot(slot, model.dimension)?;
        let rows = model.vocab.len() as u64 + SUBWORD_BUCKETS;
        if row >= rows {
            return Err(BridgeError::engine(format!(
                "input row {row} out of range for {rows} rows"
            )));
        }
        let vector = if (row as usize) < model.vocab.len() {
            model.vocab[row as usize].vector.clone()
        } else {
            seeded_vector(&format!("bucket:{row}"), model.dimension)
        };
        self.arena.write_f32s(slot.ptr, &vector)
    }

    fn nearest_neighbors(&mut self, word: &str, k: u32) -> BridgeResult<SeqHandle> {
        let model = self.model()?;
        let query = Self::token_vector(model, word);
        let ranked = Self::ranked_neighbors(model, &query, &[word], k);
        Ok(self.alloc_seq(SeqData::Scored(ranked)))
    }

    fn analogies(
        &mut self,
        k: u32,
        word_a: &str,
        word_b: &str,
        word_c: &str,
    ) -> BridgeResult<SeqHandle> {
        let model = self.model()?;
        let a = Self::token_vector(model, word_a);
        let b = Self::token_vector(model, word_b);
        let c = Self::token_vector(model, word_c);
        let query: Vec<f32> = a
            .iter()
            .zip(b.iter())
            .zip(c.iter())
            .map(|((x, y), z)| x - y + z)
            .collect();
        let ranked = Self::ranked_neighbors(model, &query, &[word_a, word_b, word_c], k);
        Ok(self.alloc_seq(SeqData::Scored(ranked)))
    }

    fn predict(&mut self, text: &str, k: u32, threshold: f32) -> BridgeResult<SeqHandle> {
        let model = self.model()?;
        let scored: Vec<(f32, String)> = if model.labels.is_empty() {
            Vec::new()
        } else {
            let query = Self::line_vector(model, text);
            let sims: Vec<f32> = model
                .labels
                .iter()
                .map(|entry| cosine(&query, &entry.vector))
                .collect();

            // Softmax over similarities, as the native classifier reports
            // probabilities rather than raw scores.
            let max = sims.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = sims
                .iter()
                .map(|s| ((s - max) * SCORE_TEMPERATURE).exp())
                .collect();
            let total: f32 = exps.iter().sum();

            model
                .labels
                .iter()
                .zip(exps)
                .map(|(entry, e)| (e / total, entry.token.clone()))
                .collect()
        };

        let mut ranked = Self::ranked(scored, k);
        ranked.retain(|(score, _)| *score >= threshold);
        Ok(self.alloc_seq(SeqData::Scored(ranked)))
    }

    fn word_id(&mut self, word: &str) -> BridgeResult<i64> {
        let model = self.model()?;
        Ok(model
            .word_index
            .get(word)
            .map_or(-1, |i| *i as i64))
    }

    fn subword_id(&mut self, subword: &str) -> BridgeResult<i64> {
        let model = self.model()?;
        if subword.is_empty() {
            return Ok(-1);
        }
        let bucket = fnv1a(subword.as_bytes()) % SUBWORD_BUCKETS;
        Ok(model.vocab.len() as i64 + bucket as i64)
    }

    fn subwords(&mut self, word: &str) -> BridgeResult<(Vec<String>, Vec<i64>)> {
        let model = self.model()?;
        let mut tokens = Vec::new();
        let mut ids = Vec::new();

        if let Some(i) = model.word_index.get(word) {
            tokens.push(word.to_string());
            ids.push(*i as i64);
        }

        let bracketed: Vec<char> = format!("<{word}>").chars().collect();
        for n in MIN_SUBWORD..=MAX_SUBWORD {
            if n > bracketed.len() {
                break;
            }
            for window in bracketed.windows(n) {
                let gram: String = window.iter().collect();
                let bucket = fnv1a(gram.as_bytes()) % SUBWORD_BUCKETS;
                tokens.push(gram);
                ids.push(model.vocab.len() as i64 + bucket as i64);
            }
        }
        Ok((tokens, ids))
    }

    fn words(&mut self) -> BridgeResult<(SeqHandle, SeqHandle)> {
        let model = self.model()?;
        let tokens: Vec<String> = model.vocab.iter().map(|e| e.token.clone()).collect();
        let counts: Vec<i64> = model.vocab.iter().map(|e| e.count).collect();
        Ok((
            self.alloc_seq(SeqData::Strings(tokens)),
            self.alloc_seq(SeqData::Ints(counts)),
        ))
    }

    fn labels(&mut self) -> BridgeResult<(SeqHandle, SeqHandle)> {
        let model = self.model()?;
        let tokens: Vec<String> = model.labels.iter().map(|e| e.token.clone()).collect();
        let counts: Vec<i64> = model.labels.iter().map(|e| e.count).collect();
        Ok((
            self.alloc_seq(SeqData::Strings(tokens)),
            self.alloc_seq(SeqData::Ints(counts)),
        ))
    }

    fn tokenize_line(&mut self, text: &str) -> BridgeResult<(SeqHandle, SeqHandle)> {
        let model = self.model()?;
        let prefix = model.label_prefix.clone();
        let line = text.split('\n').next().unwrap_or("");
        let (labels, words): (Vec<String>, Vec<String>) = line
            .split_whitespace()
            .map(str::to_string)
            .partition(|token| token.starts_with(&prefix));
        Ok((
            self.alloc_seq(SeqData::Strings(words)),
            self.alloc_seq(SeqData::Strings(labels)),
        ))
    }

    fn seq_len(&mut self, handle: SeqHandle) -> BridgeResult<u32> {
        Ok(match self.seq(handle)? {
            SeqData::Scored(v) => v.len() as u32,
            SeqData::Strings(v) => v.len() as u32,
            SeqData::Ints(v) => v.len() as u32,
        })
    }

    fn seq_scored_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<(f32, String)> {
        match self.seq(handle)? {
            SeqData::Scored(v) => v
                .get(index as usize)
                .cloned()
                .ok_or_else(|| BridgeError::engine(format!("element {index} past container end"))),
            _ => Err(BridgeError::engine("container does not hold scored pairs")),
        }
    }

    fn seq_string_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<String> {
        match self.seq(handle)? {
            SeqData::Strings(v) => v
                .get(index as usize)
                .cloned()
                .ok_or_else(|| BridgeError::engine(format!("element {index} past container end"))),
            _ => Err(BridgeError::engine("container does not hold strings")),
        }
    }

    fn seq_int_at(&mut self, handle: SeqHandle, index: u32) -> BridgeResult<i64> {
        match self.seq(handle)? {
            SeqData::Ints(v) => v
                .get(index as usize)
                .copied()
                .ok_or_else(|| BridgeError::engine(format!("element {index} past container end"))),
            _ => Err(BridgeError::engine("container does not hold integers")),
        }
    }

    fn seq_clone(&mut self, handle: SeqHandle) -> BridgeResult<SeqHandle> {
        let copy = self.seq(handle)?.clone();
        Ok(self.alloc_seq(copy))
    }

    fn seq_dispose(&mut self, handle: SeqHandle) -> BridgeResult<()> {
        self.seqs
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| BridgeError::engine(format!("unknown container handle {handle}")))
    }

    fn matrix_dims(&mut self, kind: MatrixKind) -> BridgeResult<(u64, u64)> {
        let model = self.model()?;
        if model.quantized {
            return Err(BridgeError::QuantizedModel);
        }
        let rows = match kind {
            MatrixKind::Input => model.vocab.len() as u64 + SUBWORD_BUCKETS,
            MatrixKind::Output => model.labels.len() as u64,
        };
        Ok((rows, u64::from(model.dimension)))
    }

    fn matrix_at(&mut self, kind: MatrixKind, row: u64, col: u64) -> BridgeResult<f32> {
        let model = self.model()?;
        if model.quantized {
            return Err(BridgeError::QuantizedModel);
        }
        if col >= u64::from(model.dimension) {
            return Err(BridgeError::engine(format!(
                "column {col} out of range for dimension {}",
                model.dimension
            )));
        }
        let vector = match kind {
            MatrixKind::Input => {
                if (row as usize) < model.vocab.len() {
                    model.vocab[row as usize].vector.clone()
                } else if row < model.vocab.len() as u64 + SUBWORD_BUCKETS {
                    seeded_vector(&format!("bucket:{row}"), model.dimension)
                } else {
                    return Err(BridgeError::engine(format!("row {row} out of range")));
                }
            }
            MatrixKind::Output => model
                .labels
                .get(row as usize)
                .ok_or_else(|| BridgeError::engine(format!("row {row} out of range")))?
                .vector
                .clone(),
        };
        Ok(vector[col as usize])
    }
}

// --- test fixtures ---

/// Builder producing serialized models for the mock engine.
///
/// Words added without an explicit vector get the same hash-seeded vector the
/// engine derives for unknown tokens, so fixtures stay consistent with
/// engine-side lookups. Add words before deriving labels from them.
pub struct ModelFixture {
    model: MockModel,
}

impl ModelFixture {
    /// Starts a fixture with the given embedding dimension.
    #[must_use]
    pub fn new(dimension: u32) -> Self {
        Self {
            model: MockModel {
                dimension,
                quantized: false,
                label_prefix: vectext_core::DEFAULT_LABEL_PREFIX.to_string(),
                vocab: Vec::new(),
                labels: Vec::new(),
                word_index: HashMap::new(),
            },
        }
    }

    /// Marks the model as quantized.
    #[must_use]
    pub fn quantized(mut self, quantized: bool) -> Self {
        self.model.quantized = quantized;
        self
    }

    /// Overrides the label prefix recorded in the model.
    #[must_use]
    pub fn label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.model.label_prefix = prefix.into();
        self
    }

    /// Adds a vocabulary word with a deterministic derived vector.
    #[must_use]
    pub fn word(self, token: impl Into<String>, count: i64) -> Self {
        let token = token.into();
        let vector = seeded_vector(&token, self.model.dimension);
        self.word_with_vector(token, count, vector)
    }

    /// Adds a vocabulary word with an explicit vector.
    #[must_use]
    pub fn word_with_vector(mut self, token: impl Into<String>, count: i64, vector: Vec<f32>) -> Self {
        let token = token.into();
        self.model
            .word_index
            .insert(token.clone(), self.model.vocab.len());
        self.model.vocab.push(Entry {
            token,
            count,
            vector,
        });
        self
    }

    /// Adds a label with an explicit vector.
    #[must_use]
    pub fn label(mut self, token: impl Into<String>, count: i64, vector: Vec<f32>) -> Self {
        self.model.labels.push(Entry {
            token: token.into(),
            count,
            vector,
        });
        self
    }

    /// Adds a label whose vector is the mean of the given tokens' vectors,
    /// exactly as the engine computes a sentence vector for them.
    #[must_use]
    pub fn label_for_words(self, token: impl Into<String>, count: i64, words: &[&str]) -> Self {
        let dimension = self.model.dimension;
        let mut sum = vec![0.0f32; dimension as usize];
        for word in words {
            let vector = MockEngine::token_vector(&self.model, word);
            for (acc, v) in sum.iter_mut().zip(vector) {
                *acc += v;
            }
        }
        if !words.is_empty() {
            let n = words.len() as f32;
            for acc in &mut sum {
                *acc /= n;
            }
        }
        self.label(token, count, sum)
    }

    /// Serializes the fixture into model bytes.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        encode_model(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectext_core::BridgeError;

    fn loaded_engine(bytes: &[u8]) -> MockEngine {
        let mut engine = MockEngine::new();
        engine.write_file("model.bin", bytes).unwrap();
        engine.load_model("model.bin").unwrap();
        engine
    }

    fn small_model() -> Vec<u8> {
        ModelFixture::new(8)
            .word("alpha", 10)
            .word("beta", 7)
            .word("gamma", 3)
            .label_for_words("__label__ab", 5, &["alpha", "beta"])
            .build()
    }

    #[test]
    fn test_reject_bad_magic() {
        let mut bytes = small_model();
        bytes[0] = b'X';
        let mut engine = MockEngine::new();
        engine.write_file("model.bin", &bytes).unwrap();
        let err = engine.load_model("model.bin").unwrap_err();
        assert!(matches!(err, BridgeError::ModelLoad { .. }));
        assert!(matches!(engine.metadata(), Err(BridgeError::ModelNotLoaded)));
    }

    #[test]
    fn test_reject_truncated_model() {
        let bytes = small_model();
        let mut engine = MockEngine::new();
        engine.write_file("model.bin", &bytes[..bytes.len() - 9]).unwrap();
        let err = engine.load_model("model.bin").unwrap_err();
        assert!(matches!(err, BridgeError::ModelLoad { .. }));
    }

    #[test]
    fn test_missing_staged_model_is_load_error() {
        let mut engine = MockEngine::new();
        let err = engine.load_model("nowhere.bin").unwrap_err();
        assert!(matches!(err, BridgeError::ModelLoad { .. }));
    }

    #[test]
    fn test_save_roundtrip() {
        let mut engine = loaded_engine(&small_model());
        engine.save_model("out.bin").unwrap();
        let bytes = engine.read_file("out.bin").unwrap();

        let mut second = MockEngine::new();
        second.write_file("model.bin", &bytes).unwrap();
        second.load_model("model.bin").unwrap();
        assert_eq!(second.metadata().unwrap(), engine.metadata().unwrap());
        assert_eq!(second.word_id("beta").unwrap(), 1);
    }

    #[test]
    fn test_word_ids_and_sentinel() {
        let mut engine = loaded_engine(&small_model());
        assert_eq!(engine.word_id("alpha").unwrap(), 0);
        assert_eq!(engine.word_id("gamma").unwrap(), 2);
        assert_eq!(engine.word_id("delta").unwrap(), -1);
    }

    #[test]
    fn test_subwords_are_deterministic() {
        let mut engine = loaded_engine(&small_model());
        let (tokens, ids) = engine.subwords("alpha").unwrap();
        let (tokens2, ids2) = engine.subwords("alpha").unwrap();
        assert_eq!(tokens, tokens2);
        assert_eq!(ids, ids2);
        assert_eq!(tokens.len(), ids.len());
        // The in-vocabulary word itself leads the list.
        assert_eq!(tokens[0], "alpha");
        assert_eq!(ids[0], 0);
        // Bracketed trigram follows.
        assert_eq!(tokens[1], "<al");
    }

    #[test]
    fn test_predict_orders_descending() {
        let mut engine = loaded_engine(
            &ModelFixture::new(8)
                .word("alpha", 10)
                .word("beta", 7)
                .label_for_words("__label__ab", 5, &["alpha", "beta"])
                .label_for_words("__label__a", 5, &["alpha"])
                .build(),
        );
        let handle = engine.predict("alpha beta", 10, 0.0).unwrap();
        let len = engine.seq_len(handle).unwrap();
        assert_eq!(len, 2);
        let (top, label) = engine.seq_scored_at(handle, 0).unwrap();
        let (second, _) = engine.seq_scored_at(handle, 1).unwrap();
        assert_eq!(label, "__label__ab");
        assert!(top >= second);
        engine.seq_dispose(handle).unwrap();
    }

    #[test]
    fn test_scratch_slot_must_match_dimension() {
        let mut engine = loaded_engine(&small_model());
        let ptr = engine.malloc(4 * 4).unwrap();
        let err = engine
            .word_vector(ScratchRef { ptr, len: 4 }, "alpha")
            .unwrap_err();
        assert!(matches!(err, BridgeError::Engine { .. }));
        engine.free(ptr).unwrap();
    }

    #[test]
    fn test_tokenize_line_partitions_labels() {
        let mut engine = loaded_engine(&small_model());
        let (words, labels) = engine.tokenize_line("alpha __label__ab beta").unwrap();
        assert_eq!(engine.seq_len(words).unwrap(), 2);
        assert_eq!(engine.seq_len(labels).unwrap(), 1);
        assert_eq!(engine.seq_string_at(labels, 0).unwrap(), "__label__ab");
        engine.seq_dispose(words).unwrap();
        engine.seq_dispose(labels).unwrap();
    }

    #[test]
    fn test_quantized_model_hides_matrices() {
        let mut engine = loaded_engine(
            &ModelFixture::new(8)
                .quantized(true)
                .word("alpha", 1)
                .build(),
        );
        assert!(matches!(
            engine.matrix_dims(MatrixKind::Input),
            Err(BridgeError::QuantizedModel)
        ));
        assert!(matches!(
            engine.matrix_at(MatrixKind::Output, 0, 0),
            Err(BridgeError::QuantizedModel)
        ));
    }
}
