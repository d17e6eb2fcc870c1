//! Error types for query governance
//!
//! Only [`GovernanceError`] reaches `submit_query` callers. Executor and
//! rules-provider failures are turned into `Failed` transitions and error
//! history entries instead.

use crate::saved::SavedQueryId;
use crate::state::RequestState;
use crate::types::{QueryKind, RequestId};
use qg_policy::ParseError;
use std::path::PathBuf;

/// Main governance error type
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    /// Submission or reset not allowed in the current state
    #[error("cannot proceed: {kind} request is {state}{}", .request_id.map(|id| format!(" ({id})")).unwrap_or_default())]
    InvalidState {
        /// Slot the caller touched
        kind: QueryKind,
        /// Its current state
        state: RequestState,
        /// Request occupying the slot
        request_id: Option<RequestId>,
    },

    /// Rule document failed to parse and no earlier rule set exists
    #[error("rule document error: {0}")]
    Parse(#[from] ParseError),

    /// Request kind does not match its target
    #[error("{kind} request cannot run against a {target} target")]
    TargetMismatch {
        /// Declared kind
        kind: QueryKind,
        /// Kind of the target
        target: QueryKind,
    },

    /// Transition outside the allowed table
    #[error("state machine error: {0}")]
    Transition(#[from] TransitionError),

    /// Saved query operation failed
    #[error("saved query error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GovernanceError {
    /// Check if the caller can retry once the slot frees up
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// Check if this is a concurrency-guard rejection
    #[inline]
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// Illegal state machine transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    /// State before
    pub from: RequestState,
    /// Requested state
    pub to: RequestState,
}

/// Failure reported by a file or database executor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Backend rejected or failed the query
    #[error("backend error: {0}")]
    Backend(String),

    /// Backend unreachable
    #[error("network error: {0}")]
    Network(String),

    /// No result within the configured time
    #[error("execution timed out after {after_ms}ms")]
    Timeout {
        /// Configured limit
        after_ms: u64,
    },

    /// Backend returned data that does not decode into a result payload
    #[error("invalid result payload: {0}")]
    InvalidPayload(String),

    /// Executor task ended without reporting a result
    #[error("executor aborted: {0}")]
    Aborted(String),
}

impl ExecutionError {
    /// Check if a retry might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }
}

/// Failure of the rules provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    /// Provider could not be reached
    #[error("rules provider unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the lookup
    #[error("rules lookup failed for user {user_id}: {reason}")]
    Lookup {
        /// User whose rules were requested
        user_id: String,
        /// Provider message
        reason: String,
    },
}

/// Saved query CRUD errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No saved query with this id
    #[error("saved query not found: {0}")]
    NotFound(SavedQueryId),

    /// Rejected input
    #[error("invalid saved query: {0}")]
    Invalid(String),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not decode
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Decoded but out of range
    #[error("invalid configuration value: {0}")]
    Invalid(String),
}
