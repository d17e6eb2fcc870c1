//! Per-session stores
//!
//! History and saved queries belong to a session, not to the process.
//! Orchestrators built over different contexts never see each other's data.

use crate::history::{HistoryLedger, DEFAULT_HISTORY_CAPACITY};
use crate::saved::SavedQueryRegistry;
use std::sync::Arc;

/// Session-owned history ledger and saved query registry
#[derive(Debug, Clone)]
pub struct SessionContext {
    history: Arc<HistoryLedger>,
    saved: Arc<SavedQueryRegistry>,
}

impl SessionContext {
    /// Create new context with `history_capacity` entries per kind
    #[inline]
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history: Arc::new(HistoryLedger::new(history_capacity)),
            saved: Arc::new(SavedQueryRegistry::new()),
        }
    }

    /// Context over existing stores
    #[inline]
    #[must_use]
    pub fn from_parts(history: Arc<HistoryLedger>, saved: Arc<SavedQueryRegistry>) -> Self {
        Self { history, saved }
    }

    /// History ledger
    #[inline]
    #[must_use]
    pub fn history(&self) -> &Arc<HistoryLedger> {
        &self.history
    }

    /// Saved query registry
    #[inline]
    #[must_use]
    pub fn saved(&self) -> &Arc<SavedQueryRegistry> {
        &self.saved
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
