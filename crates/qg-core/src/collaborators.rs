//! External collaborators
//!
//! The orchestrator never talks to a backend directly: it asks a
//! [`RulesProvider`] for the rule document and hands validated queries to a
//! [`FileExecutor`] or [`DatabaseExecutor`].

use crate::error::{ExecutionError, RulesError};
use crate::types::{DatabaseId, ExecutionOutput, FileId, QueryParams};
use async_trait::async_trait;
use dashmap::DashMap;

/// Source of each user's current business-rule document
#[async_trait]
pub trait RulesProvider: Send + Sync {
    /// Current rule text for `user_id`; empty text means no restrictions
    async fn get_rules(&self, user_id: &str) -> Result<String, RulesError>;
}

/// Executes questions over uploaded files
#[async_trait]
pub trait FileExecutor: Send + Sync {
    /// Run `query` against `file_id`
    async fn execute(
        &self,
        file_id: &FileId,
        query: &str,
        params: &QueryParams,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Executes queries against database connections
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Run `query` against `database_id`
    ///
    /// Raw backend JSON should go through [`ResultPayload::from_value`].
    /// Rows whose width differs from the column list fail the request.
    ///
    /// [`ResultPayload::from_value`]: crate::types::ResultPayload::from_value
    async fn execute(
        &self,
        database_id: &DatabaseId,
        query: &str,
        params: &QueryParams,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Per-user rule documents held in memory
///
/// Users without their own document get the fallback text (empty unless
/// set with [`InMemoryRules::with_fallback`]).
#[derive(Debug, Default)]
pub struct InMemoryRules {
    documents: DashMap<String, String>,
    fallback: String,
}

impl InMemoryRules {
    /// Create new empty provider
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With the document used for users that have none
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = text.into();
        self
    }

    /// Replace the document of `user_id`
    pub fn set_rules(&self, user_id: impl Into<String>, text: impl Into<String>) {
        let user_id = user_id.into();
        tracing::debug!(user = %user_id, "rule document replaced");
        self.documents.insert(user_id, text.into());
    }

    /// Drop the document of `user_id`
    pub fn remove_rules(&self, user_id: &str) {
        self.documents.remove(user_id);
    }

    /// Document currently stored for `user_id`
    #[must_use]
    pub fn rules_for(&self, user_id: &str) -> String {
        self.documents
            .get(user_id)
            .map_or_else(|| self.fallback.clone(), |doc| doc.value().clone())
    }
}

#[async_trait]
impl RulesProvider for InMemoryRules {
    async fn get_rules(&self, user_id: &str) -> Result<String, RulesError> {
        Ok(self.rules_for(user_id))
    }
}
