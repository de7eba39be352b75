#![forbid(unsafe_code)]

//! Model configuration.
//!
//! The only knobs the core owns are the two cascade bounds enforced by the
//! [`ExecutionScope`](crate::scope::ExecutionScope). Everything else is the
//! business of the schema layer.
//!
//! With the `policy-config` feature the configuration can be loaded from TOML
//! or JSON; missing fields take their defaults.

use crate::scope::ScopeLimits;

/// Default bound on exit-handler hand-offs before a cascade is declared
/// non-terminating.
pub const DEFAULT_MAX_TRANSFER_COUNT: usize = 100;

/// Default bound on scope nesting depth.
pub const DEFAULT_MAX_SCOPE_DEPTH: usize = 50;

/// Configuration for a [`Model`](crate::model::Model).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct ModelConfig {
    /// Maximum number of times pending exit handlers may be handed from one
    /// scope to the next before disposal fails with
    /// [`ModelError::TransferLimitExceeded`](crate::ModelError::TransferLimitExceeded).
    /// Default: 100
    pub max_transfer_count: usize,

    /// Maximum scope nesting depth before
    /// [`ModelError::DepthLimitExceeded`](crate::ModelError::DepthLimitExceeded).
    /// Default: 50
    pub max_scope_depth: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_transfer_count: DEFAULT_MAX_TRANSFER_COUNT,
            max_scope_depth: DEFAULT_MAX_SCOPE_DEPTH,
        }
    }
}

impl ModelConfig {
    /// Set the transfer bound.
    #[must_use]
    pub fn with_max_transfer_count(mut self, limit: usize) -> Self {
        self.max_transfer_count = limit;
        self
    }

    /// Set the nesting-depth bound.
    #[must_use]
    pub fn with_max_scope_depth(mut self, limit: usize) -> Self {
        self.max_scope_depth = limit;
        self
    }

    /// Replace unusable values (zero bounds) with defaults.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            max_transfer_count: normalize_limit(self.max_transfer_count, DEFAULT_MAX_TRANSFER_COUNT),
            max_scope_depth: normalize_limit(self.max_scope_depth, DEFAULT_MAX_SCOPE_DEPTH),
        }
    }

    /// Scope limits derived from this configuration.
    #[must_use]
    pub fn scope_limits(&self) -> ScopeLimits {
        let config = self.sanitized();
        ScopeLimits {
            max_transfer_count: config.max_transfer_count,
            max_depth: config.max_scope_depth,
        }
    }
}

fn normalize_limit(value: usize, fallback: usize) -> usize {
    if value == 0 { fallback } else { value }
}

/// Errors from loading a policy file.
#[cfg(feature = "policy-config")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML model config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON model config: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "policy-config")]
impl ModelConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        Ok(config.sanitized())
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        Ok(config.sanitized())
    }
}
