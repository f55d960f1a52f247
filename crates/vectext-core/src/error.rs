use thiserror::Error;

/// Canonical error type for bridge operations.
///
/// Every marshaling failure surfaces immediately as one of these variants;
/// none are swallowed, because a swallowed failure at this layer risks a
/// leaked or dangling cross-boundary allocation. None of them are transient,
/// so no retry policy applies.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Model bytes were malformed or unreadable during load.
    #[error("model load failed: {message}")]
    ModelLoad {
        /// Human-readable parse or staging failure details.
        message: String,
    },

    /// Operation invoked before a model was successfully loaded.
    #[error("model is not loaded")]
    ModelNotLoaded,

    /// The engine arena could not satisfy an allocation.
    #[error("engine arena out of memory: requested {requested} bytes")]
    OutOfMemory {
        /// Size of the allocation that failed, in bytes.
        requested: u64,
    },

    /// Raw matrix access attempted on a quantized model.
    #[error("matrix access is unsupported on a quantized model")]
    QuantizedModel,

    /// Container or matrix access outside `[0, len)`.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// Index that was requested.
        index: u64,
        /// Length of the container or axis.
        len: u64,
    },

    /// Container accessed, cloned, or disposed after disposal.
    #[error("container was already disposed")]
    DisposedContainer,

    /// Fault reported by the engine itself (bad handle, protocol violation).
    #[error("engine fault: {message}")]
    Engine {
        /// Human-readable fault description from the engine boundary.
        message: String,
    },

    /// Configuration could not be loaded or deserialized.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while retrieving model bytes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Creates a `ModelLoad` variant.
    #[must_use]
    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad {
            message: message.into(),
        }
    }

    /// Creates an `OutOfMemory` variant.
    #[must_use]
    pub fn out_of_memory(requested: u64) -> Self {
        Self::OutOfMemory { requested }
    }

    /// Creates an `IndexOutOfRange` variant.
    #[must_use]
    pub fn index_out_of_range(index: u64, len: u64) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    /// Creates an `Engine` variant.
    #[must_use]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenient result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::out_of_memory(1024);
        assert_eq!(
            err.to_string(),
            "engine arena out of memory: requested 1024 bytes"
        );

        let err = BridgeError::index_out_of_range(5, 3);
        assert_eq!(err.to_string(), "index 5 out of range for length 3");
    }

    #[test]
    fn test_model_load_constructor() {
        let err = BridgeError::model_load("bad magic");
        assert!(matches!(err, BridgeError::ModelLoad { .. }));
        assert_eq!(err.to_string(), "model load failed: bad magic");
    }
}
