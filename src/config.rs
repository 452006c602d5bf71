//! Engine configuration
//!
//! Limits and capabilities for one engine instance. Loaded from TOML with
//! every field optional, then optionally overridden from `ORC_*`
//! environment variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Overrides `stack_limit`.
pub const ENV_STACK_LIMIT: &str = "ORC_STACK_LIMIT";
/// Overrides `token_limit`.
pub const ENV_TOKEN_LIMIT: &str = "ORC_TOKEN_LIMIT";
/// Overrides `max_publications`.
pub const ENV_MAX_PUBLICATIONS: &str = "ORC_MAX_PUBLICATIONS";

/// Limits use 0 for "unbounded".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum continuation stack height per token.
    pub stack_limit: usize,
    /// Maximum number of live tokens.
    pub token_limit: usize,
    /// The engine halts after this many top-level publications.
    pub max_publications: usize,
    /// Named permissions that sites check before acting.
    pub capabilities: BTreeMap<String, bool>,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            (ENV_STACK_LIMIT, &mut self.stack_limit),
            (ENV_TOKEN_LIMIT, &mut self.token_limit),
            (ENV_MAX_PUBLICATIONS, &mut self.max_publications),
        ];
        for (name, field) in fields {
            if let Some(raw) = lookup(name) {
                *field = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid_env_var(name, "expected unsigned integer"))?;
            }
        }
        Ok(self)
    }

    /// Whether the named capability is granted. Missing names are denied.
    pub fn capability(&self, name: &str) -> bool {
        self.capabilities.get(name).copied().unwrap_or(false)
    }

    pub fn grant(mut self, name: &str) -> Self {
        self.capabilities.insert(name.to_string(), true);
        self
    }
}
