//! Query governance core (qg-core)
//!
//! Sits between a query-submitting client and the backends that execute
//! queries:
//! - Checks every query against the user's business-rule document
//! - Allows at most one in-flight request per query kind
//! - Discards results that arrive after their request was superseded
//! - Keeps a bounded history and a saved query registry per session
//!
//! # Example
//!
//! ```rust,ignore
//! use qg_core::prelude::*;
//!
//! let rules = Arc::new(InMemoryRules::new().with_fallback("no DELETE statements allowed"));
//! let orchestrator = QueryOrchestrator::new(
//!     OrchestratorConfig::default(),
//!     Collaborators::new(rules, files, databases),
//! )?;
//!
//! let outcome = orchestrator
//!     .submit_query(QueryRequest::database("alice", "sales", "DELETE FROM orders"))
//!     .await?;
//! assert!(outcome.is_blocked());
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

// Core modules
pub mod collaborators;
pub mod config;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod saved;
pub mod session;
pub mod state;
pub mod types;

// Re-exports for convenience
pub use collaborators::{DatabaseExecutor, FileExecutor, InMemoryRules, RulesProvider};
pub use config::{OrchestratorConfig, PolicyScope};
pub use error::{ConfigError, ExecutionError, GovernanceError, RegistryError, RulesError, TransitionError};
pub use history::{HistoryFilter, HistoryLedger, HistoryQuery, HistorySort, DEFAULT_HISTORY_CAPACITY};
pub use orchestrator::{Collaborators, QueryOrchestrator, SubmitOutcome};
pub use saved::{NewSavedQuery, SavedQuery, SavedQueryFilter, SavedQueryId, SavedQueryPatch, SavedQueryRegistry};
pub use session::SessionContext;
pub use state::{allowed_transitions, validate_transition, RequestState};
pub use types::{
    DatabaseId, ExecutionOutput, FileId, HistoryEntry, HistoryEntryId, QueryKind, QueryMetadata,
    QueryParams, QueryRequest, QueryResult, QueryStatus, QueryTarget, RequestId, ResultPayload,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with qg-core
    pub use crate::{
        Collaborators, DatabaseExecutor, ExecutionError, ExecutionOutput, FileExecutor,
        GovernanceError, HistoryFilter, InMemoryRules, OrchestratorConfig, QueryKind,
        QueryOrchestrator, QueryRequest, QueryResult, RequestState, ResultPayload, RulesProvider,
        SubmitOutcome,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
