//! Runtime configuration
//!
//! Loaded from TOML at startup, falls back to defaults if no config file
//! exists or it fails to parse.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Throw on type contract violations found by object validation instead
    /// of logging them.
    pub strict_contracts: bool,
    /// Pending property changes an object may queue before `set` fails.
    pub observer_queue_limit: usize,
    /// Patterns considered part of the core. `extend_inherits(.., true)`
    /// leaves these out.
    pub core_patterns: Vec<String>,
    /// Phase the CLI builds objects to.
    pub default_phase: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict_contracts: false,
            observer_queue_limit: 64,
            core_patterns: vec![crate::ROOT_PATTERN.to_string()],
            default_phase: crate::phase::FINAL.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} - using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.observer_queue_limit == 0 {
            return Err(Error::ConfigError("observer_queue_limit must be at least 1".into()));
        }
        if self.default_phase.is_empty() {
            return Err(Error::ConfigError("default_phase must not be empty".into()));
        }
        Ok(())
    }

    pub fn is_core(&self, pattern: &str) -> bool {
        self.core_patterns.iter().any(|p| p == pattern)
    }
}
