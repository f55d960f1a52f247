//! Read-only views over the model's dense matrices.

use vectext_core::{BridgeError, BridgeResult, MatrixKind};
use vectext_engine::SharedEngine;

/// A read-only accessor into an engine-owned dense matrix.
///
/// The view holds the engine alive for as long as it exists; cells are
/// fetched through the boundary one at a time. Only available for
/// non-quantized models — the facade rejects the request before any engine
/// access otherwise.
pub struct DenseMatrixView {
    engine: SharedEngine,
    kind: MatrixKind,
    rows: u64,
    cols: u64,
}

impl DenseMatrixView {
    pub(crate) fn open(engine: SharedEngine, kind: MatrixKind) -> BridgeResult<Self> {
        let (rows, cols) = engine.lock().matrix_dims(kind)?;
        Ok(Self {
            engine,
            kind,
            rows,
            cols,
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> u64 {
        self.cols
    }

    /// The cell at (`row`, `col`).
    ///
    /// # Errors
    ///
    /// `IndexOutOfRange` when either coordinate is outside the matrix.
    pub fn at(&self, row: u64, col: u64) -> BridgeResult<f32> {
        if row >= self.rows {
            return Err(BridgeError::index_out_of_range(row, self.rows));
        }
        if col >= self.cols {
            return Err(BridgeError::index_out_of_range(col, self.cols));
        }
        self.engine.lock().matrix_at(self.kind, row, col)
    }
}
