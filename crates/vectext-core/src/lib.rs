//! Core error taxonomy, shared value types, and configuration for VecText.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BridgeConfig, DEFAULT_LABEL_PREFIX, DEFAULT_MODEL_PATH};
pub use error::{BridgeError, BridgeResult};
pub use types::{MatrixKind, ModelInfo, ScoredLabel};
