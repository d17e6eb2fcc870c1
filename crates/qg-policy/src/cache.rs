//! Version-keyed cache of parsed rule sets using moka
//!
//! Rule documents are re-read on every submission; the cache turns an
//! unchanged document into a shared [`RuleSet`] without re-parsing.

use crate::error::ParseError;
use crate::parser::RuleSetParser;
use crate::rule::{RuleSet, RuleSetVersion};
use moka::sync::Cache;
use std::sync::Arc;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of cached rule sets
    pub entry_count: u64,
}

/// Parsed rule sets keyed by content version
///
/// Failed parses are never cached.
#[derive(Debug, Clone)]
pub struct RuleSetCache {
    inner: Cache<RuleSetVersion, Arc<RuleSet>>,
    parser: RuleSetParser,
}

impl RuleSetCache {
    /// Create new cache holding at most `max_capacity` rule sets
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
            parser: RuleSetParser::new(),
        }
    }

    /// Cached rule set for `text`, parsing on miss
    ///
    /// # Errors
    /// Propagates the [`ParseError`] of a document that fails to parse.
    pub fn get_or_parse(&self, text: &str) -> Result<Arc<RuleSet>, ParseError> {
        let version = RuleSetVersion::of(text);
        if let Some(cached) = self.inner.get(&version) {
            return Ok(cached);
        }

        let parsed = Arc::new(self.parser.parse(text)?);
        self.inner.insert(version, Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Cached rule set with the given version, if any
    #[inline]
    #[must_use]
    pub fn get(&self, version: &RuleSetVersion) -> Option<Arc<RuleSet>> {
        self.inner.get(version)
    }

    /// Drop every cached rule set
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Get cache statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks();
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

impl Default for RuleSetCache {
    fn default() -> Self {
        Self::new(64)
    }
}
