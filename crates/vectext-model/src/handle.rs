//! Model handle state machine.
//!
//! A handle starts `Unloaded`, moves to `Loaded` on a successful parse, and
//! to `Failed` when the engine rejects the staged bytes. Every operation the
//! facade offers requires `Loaded` and fails fast with `ModelNotLoaded`
//! otherwise; nothing is attempted against the engine first.

use tracing::{info, warn};
use vectext_core::{BridgeError, BridgeResult, ModelInfo};
use vectext_engine::SharedEngine;

/// Lifecycle of a model handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No load has been attempted.
    Unloaded,
    /// The engine parsed a model; metadata is fixed for the handle's life.
    Loaded(ModelInfo),
    /// The last load attempt was rejected.
    Failed,
}

/// Owns the loaded model resource inside the engine.
pub struct ModelHandle {
    engine: SharedEngine,
    state: LoadState,
}

impl ModelHandle {
    /// Creates an unloaded handle over an engine.
    #[must_use]
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            engine,
            state: LoadState::Unloaded,
        }
    }

    /// The shared engine behind this handle.
    #[must_use]
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Metadata of the loaded model.
    ///
    /// # Errors
    ///
    /// `ModelNotLoaded` unless the handle is in the `Loaded` state.
    pub fn info(&self) -> BridgeResult<ModelInfo> {
        match self.state {
            LoadState::Loaded(info) => Ok(info),
            _ => Err(BridgeError::ModelNotLoaded),
        }
    }

    /// Stages `bytes` in the engine filesystem at `staged_path` and asks the
    /// engine to parse them.
    ///
    /// On a parse failure the staged file is removed again, the state moves
    /// to `Failed`, and the error propagates. Metadata captured on success
    /// is immutable for the handle's lifetime.
    pub fn load(&mut self, bytes: &[u8], staged_path: &str) -> BridgeResult<ModelInfo> {
        let mut engine = self.engine.lock();
        engine.write_file(staged_path, bytes)?;

        if let Err(err) = engine.load_model(staged_path) {
            if let Err(unlink_err) = engine.unlink(staged_path) {
                warn!(%unlink_err, staged_path, "could not remove rejected model file");
            }
            self.state = LoadState::Failed;
            return Err(err);
        }

        let meta = engine.metadata()?;
        let info = ModelInfo {
            dimension: meta.dimension,
            quantized: meta.quantized,
        };
        self.state = LoadState::Loaded(info);
        info!(
            dimension = info.dimension,
            quantized = info.quantized,
            "model loaded"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectext_engine::{share, MockEngine, ModelFixture, TextEngine};

    #[test]
    fn test_states_progress_on_load() {
        let engine = share(MockEngine::new());
        let mut handle = ModelHandle::new(engine);
        assert_eq!(handle.state(), LoadState::Unloaded);
        assert!(matches!(handle.info(), Err(BridgeError::ModelNotLoaded)));

        let bytes = ModelFixture::new(4).word("one", 1).build();
        let info = handle.load(&bytes, "model.bin").unwrap();
        assert_eq!(info.dimension, 4);
        assert_eq!(handle.state(), LoadState::Loaded(info));
    }

    #[test]
    fn test_failed_load_cleans_staged_file() {
        let engine = share(MockEngine::new());
        let mut handle = ModelHandle::new(engine.clone());

        let err = handle.load(b"not a model", "model.bin").unwrap_err();
        assert!(matches!(err, BridgeError::ModelLoad { .. }));
        assert_eq!(handle.state(), LoadState::Failed);
        assert!(matches!(handle.info(), Err(BridgeError::ModelNotLoaded)));

        // The rejected bytes are gone from the engine filesystem.
        assert!(engine.lock().read_file("model.bin").is_err());
    }
}
