//! Orchestrator configuration
//!
//! Decoded from TOML; every key is optional.
//!
//! ```toml
//! history_capacity = 100
//! execution_timeout_ms = 30000
//! rule_cache_capacity = 64
//!
//! [policy_scope]
//! file = true
//! database = true
//! ```

use crate::error::ConfigError;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::types::QueryKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which query kinds are validated against the rule document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyScope {
    /// Validate file questions
    pub file: bool,
    /// Validate database queries
    pub database: bool,
}

impl PolicyScope {
    /// Check if requests of `kind` are validated
    #[inline]
    #[must_use]
    pub fn applies(&self, kind: QueryKind) -> bool {
        match kind {
            QueryKind::File => self.file,
            QueryKind::Database => self.database,
        }
    }
}

impl Default for PolicyScope {
    fn default() -> Self {
        Self {
            file: true,
            database: true,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// History entries kept per kind
    pub history_capacity: usize,
    /// Soft execution timeout; none waits for the executor
    pub execution_timeout_ms: Option<u64>,
    /// Kinds subject to validation
    pub policy_scope: PolicyScope,
    /// Parsed rule sets kept in the cache
    pub rule_cache_capacity: u64,
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With history capacity
    #[inline]
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// With soft execution timeout
    #[inline]
    #[must_use]
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// With policy scope
    #[inline]
    #[must_use]
    pub fn with_policy_scope(mut self, scope: PolicyScope) -> Self {
        self.policy_scope = scope;
        self
    }

    /// With rule cache capacity
    #[inline]
    #[must_use]
    pub fn with_rule_cache_capacity(mut self, capacity: u64) -> Self {
        self.rule_cache_capacity = capacity;
        self
    }

    /// Soft execution timeout
    #[inline]
    #[must_use]
    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }

    /// Reject out-of-range values
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] for a zero history capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Decode from TOML text
    ///
    /// # Errors
    /// [`ConfigError::Toml`] on malformed TOML, [`ConfigError::Invalid`] on
    /// out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`OrchestratorConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            execution_timeout_ms: None,
            policy_scope: PolicyScope::default(),
            rule_cache_capacity: 64,
        }
    }
}
