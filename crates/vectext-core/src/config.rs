//! Configuration for the bridge.
//!
//! Supports optional config files, `VECTEXT_*` environment overrides, and
//! reasonable defaults. The label prefix is configuration rather than a
//! hard-coded constant so the resolver is not coupled to one model's
//! training convention.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;

/// Default label prefix used by classifier models.
pub const DEFAULT_LABEL_PREFIX: &str = "__label__";

/// Default path under which model bytes are staged in the engine filesystem.
pub const DEFAULT_MODEL_PATH: &str = "model.bin";

fn default_label_prefix() -> String {
    DEFAULT_LABEL_PREFIX.to_string()
}

fn default_model_path() -> String {
    DEFAULT_MODEL_PATH.to_string()
}

fn default_arena_bytes() -> u32 {
    16 * 1024 * 1024
}

/// Root configuration for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Label prefix the loaded model was trained with.
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// Path under which model bytes are staged before parsing.
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Arena capacity for the in-process engine, in bytes.
    #[serde(default = "default_arena_bytes")]
    pub arena_bytes: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            label_prefix: default_label_prefix(),
            model_path: default_model_path(),
            arena_bytes: default_arena_bytes(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration with precedence:
    /// 1. Environment variables (highest priority), e.g. `VECTEXT_LABEL_PREFIX`
    /// 2. `./config/vectext.{yaml,toml,json}`
    /// 3. Hardcoded defaults (lowest priority)
    pub fn load() -> BridgeResult<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name("./config/vectext").required(false))
            .add_source(
                Environment::with_prefix("VECTEXT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Sets the label prefix (builder pattern).
    #[must_use]
    pub fn with_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = prefix.into();
        self
    }

    /// Sets the staged model path (builder pattern).
    #[must_use]
    pub fn with_model_path(mut self, path: impl Into<String>) -> Self {
        self.model_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.label_prefix, "__label__");
        assert_eq!(cfg.model_path, "model.bin");
        assert!(cfg.arena_bytes > 0);
    }

    #[test]
    fn test_builder_overrides() {
        let cfg = BridgeConfig::default()
            .with_label_prefix("__class__")
            .with_model_path("staging/model.ftz");
        assert_eq!(cfg.label_prefix, "__class__");
        assert_eq!(cfg.model_path, "staging/model.ftz");
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: BridgeConfig = serde_json::from_str(r#"{"label_prefix": "__lang__"}"#).unwrap();
        assert_eq!(cfg.label_prefix, "__lang__");
        assert_eq!(cfg.model_path, "model.bin");
    }
}
