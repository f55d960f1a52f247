//! Value types shared across the bridge.

use serde::{Deserialize, Serialize};

/// A ranked classification or similarity result.
///
/// Sequences of these are produced in descending-score order. Ties keep the
/// order the engine returned them in; the bridge never re-sorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    /// Probability or cosine similarity, depending on the producing call.
    pub score: f32,
    /// The label or token text.
    pub label: String,
}

impl ScoredLabel {
    /// Creates a new scored label.
    #[must_use]
    pub fn new(score: f32, label: impl Into<String>) -> Self {
        Self {
            score,
            label: label.into(),
        }
    }
}

/// Immutable metadata captured when a model is loaded.
///
/// Both fields are derived from the parsed model and stay constant for the
/// lifetime of the handle that loaded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Dimension (size) of a lookup vector.
    pub dimension: u32,
    /// Whether the model is a compressed, quantized variant.
    pub quantized: bool,
}

/// Which dense matrix of a model to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    /// The input (word/subword) embedding matrix.
    Input,
    /// The output (label) matrix.
    Output,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_label_roundtrip() {
        let label = ScoredLabel::new(0.93, "__label__en");
        let json = serde_json::to_string(&label).unwrap();
        let back: ScoredLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, label);
    }

    #[test]
    fn test_model_info_is_copy() {
        let info = ModelInfo {
            dimension: 16,
            quantized: false,
        };
        let copy = info;
        assert_eq!(copy, info);
    }
}
