//! Model handle, facade, and matrix views for VecText.

pub mod handle;
pub mod matrix;
pub mod model;

pub use handle::{LoadState, ModelHandle};
pub use matrix::DenseMatrixView;
pub use model::{ModelSource, PredictOptions, TextModel, DEFAULT_NEIGHBORS};
