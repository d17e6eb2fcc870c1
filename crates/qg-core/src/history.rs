//! History ledger
//!
//! Bounded, newest-first log of finished requests, one bucket per
//! [`QueryKind`]. Appending beyond capacity drops the oldest entry.

use crate::types::{HistoryEntry, QueryKind, QueryStatus};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::Arc;

/// Entries kept per kind unless configured otherwise
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Order of a history query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistorySort {
    /// Most recent first (ledger order)
    #[default]
    NewestFirst,
    /// Oldest first
    OldestFirst,
    /// Longest execution time first; entries without one last
    SlowestFirst,
}

/// Predicates over history entries; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Bucket to read; both when unset
    pub kind: Option<QueryKind>,
    /// Case-insensitive substring of the query text
    pub search: Option<String>,
    /// Outcome status
    pub status: Option<QueryStatus>,
    /// Inclusive lower time bound
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper time bound
    pub to: Option<DateTime<Utc>>,
    /// Submitting user
    pub user_id: Option<String>,
    /// Result order
    pub sort: HistorySort,
}

impl HistoryFilter {
    /// Create empty filter
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// With search term
    #[inline]
    #[must_use]
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: QueryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// With time range `[from, to)`
    #[inline]
    #[must_use]
    pub fn with_range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// With user
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// With sort order
    #[inline]
    #[must_use]
    pub fn sorted(mut self, sort: HistorySort) -> Self {
        self.sort = sort;
        self
    }

    /// Check one entry against every set predicate
    #[must_use]
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.kind.map_or(true, |k| entry.kind == k)
            && self.status.map_or(true, |s| entry.status == s)
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp < to)
            && self.user_id.as_deref().map_or(true, |u| entry.user_id == u)
            && self.search.as_deref().map_or(true, |term| {
                entry.raw_query.to_lowercase().contains(&term.to_lowercase())
            })
    }
}

/// Snapshot of the ledger filtered on iteration
///
/// Later appends do not show up here; every call to [`HistoryQuery::iter`]
/// starts again from the first entry.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    snapshot: Arc<[HistoryEntry]>,
    filter: HistoryFilter,
}

impl HistoryQuery {
    /// Iterate matching entries in the requested order
    pub fn iter(&self) -> Box<dyn Iterator<Item = &HistoryEntry> + '_> {
        let matching = self.snapshot.iter().filter(|e| self.filter.matches(e));
        match self.filter.sort {
            HistorySort::NewestFirst => Box::new(matching),
            HistorySort::OldestFirst => Box::new(matching.rev()),
            HistorySort::SlowestFirst => {
                let mut sorted: Vec<&HistoryEntry> = matching.collect();
                sorted.sort_by_key(|e| Reverse(e.execution_time_ms));
                Box::new(sorted.into_iter())
            }
        }
    }

    /// Number of matching entries
    #[must_use]
    pub fn count(&self) -> usize {
        self.snapshot.iter().filter(|e| self.filter.matches(e)).count()
    }

    /// Matching entries collected in order
    #[must_use]
    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.iter().cloned().collect()
    }

    /// Filter this query was built with
    #[inline]
    #[must_use]
    pub fn filter(&self) -> &HistoryFilter {
        &self.filter
    }
}

impl<'a> IntoIterator for &'a HistoryQuery {
    type Item = &'a HistoryEntry;
    type IntoIter = Box<dyn Iterator<Item = &'a HistoryEntry> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Default)]
struct Buckets {
    file: VecDeque<HistoryEntry>,
    database: VecDeque<HistoryEntry>,
}

impl Buckets {
    fn get(&self, kind: QueryKind) -> &VecDeque<HistoryEntry> {
        match kind {
            QueryKind::File => &self.file,
            QueryKind::Database => &self.database,
        }
    }

    fn get_mut(&mut self, kind: QueryKind) -> &mut VecDeque<HistoryEntry> {
        match kind {
            QueryKind::File => &mut self.file,
            QueryKind::Database => &mut self.database,
        }
    }
}

/// Bounded per-kind history
#[derive(Debug)]
pub struct HistoryLedger {
    capacity: usize,
    buckets: RwLock<Buckets>,
}

impl HistoryLedger {
    /// Create ledger keeping `capacity` entries per kind (at least one)
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buckets: RwLock::new(Buckets::default()),
        }
    }

    /// Entries kept per kind
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a finished request in the bucket of `entry.kind`
    pub fn append(&self, entry: HistoryEntry) {
        let mut buckets = self.buckets.write();
        let bucket = buckets.get_mut(entry.kind);
        bucket.push_front(entry);
        bucket.truncate(self.capacity);
    }

    /// Empty one bucket, or both
    pub fn clear(&self, kind: Option<QueryKind>) {
        let mut buckets = self.buckets.write();
        match kind {
            Some(kind) => buckets.get_mut(kind).clear(),
            None => {
                buckets.file.clear();
                buckets.database.clear();
            }
        }
        tracing::debug!(kind = ?kind, "history cleared");
    }

    /// Entries held for `kind`
    #[inline]
    #[must_use]
    pub fn len(&self, kind: QueryKind) -> usize {
        self.buckets.read().get(kind).len()
    }

    /// Check if the bucket for `kind` is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self, kind: QueryKind) -> bool {
        self.len(kind) == 0
    }

    /// Snapshot of the entries matching `filter`
    ///
    /// Without a kind in the filter both buckets are merged newest-first.
    #[must_use]
    pub fn query(&self, filter: &HistoryFilter) -> HistoryQuery {
        let buckets = self.buckets.read();
        let snapshot: Vec<HistoryEntry> = match filter.kind {
            Some(kind) => buckets.get(kind).iter().cloned().collect(),
            None => {
                let mut merged: Vec<HistoryEntry> = buckets
                    .file
                    .iter()
                    .chain(buckets.database.iter())
                    .cloned()
                    .collect();
                merged.sort_by_key(|e| Reverse(e.timestamp));
                merged
            }
        };
        HistoryQuery {
            snapshot: snapshot.into(),
            filter: filter.clone(),
        }
    }

    /// Replace the bucket for `kind` with persisted entries (newest first)
    ///
    /// Entries of another kind are skipped; the capacity still applies.
    pub fn restore(&self, kind: QueryKind, entries: impl IntoIterator<Item = HistoryEntry>) {
        let restored: VecDeque<HistoryEntry> = entries
            .into_iter()
            .filter(|e| e.kind == kind)
            .take(self.capacity)
            .collect();
        let count = restored.len();
        *self.buckets.write().get_mut(kind) = restored;
        tracing::debug!(%kind, count, "history restored");
    }
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QueryRequest, QueryResult};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn entry(kind: QueryKind, query: &str, ms: Option<u64>) -> HistoryEntry {
        let request = match kind {
            QueryKind::File => QueryRequest::file("u1", "f1", query),
            QueryKind::Database => QueryRequest::database("u1", "db1", query),
        };
        let mut entry = HistoryEntry::from_result(&request, &QueryResult::failure(request.id, "x", 0));
        entry.execution_time_ms = ms;
        entry
    }

    fn queries(query: &HistoryQuery) -> Vec<String> {
        query.iter().map(|e| e.raw_query.clone()).collect()
    }

    #[test]
    fn newest_first_with_capacity() {
        let ledger = HistoryLedger::new(100);
        for i in 0..150 {
            ledger.append(entry(QueryKind::Database, &format!("q{i}"), None));
        }
        assert_eq!(ledger.len(QueryKind::Database), 100);

        let all = ledger.query(&HistoryFilter::new().with_kind(QueryKind::Database));
        let seen = queries(&all);
        assert_eq!(seen.first().map(String::as_str), Some("q149"));
        assert_eq!(seen.last().map(String::as_str), Some("q50"));
        assert!(!seen.iter().any(|q| q == "q49"));
    }

    #[test]
    fn kinds_are_separate_buckets() {
        let ledger = HistoryLedger::new(2);
        ledger.append(entry(QueryKind::File, "f", None));
        for i in 0..3 {
            ledger.append(entry(QueryKind::Database, &format!("d{i}"), None));
        }
        assert_eq!(ledger.len(QueryKind::File), 1);
        assert_eq!(ledger.len(QueryKind::Database), 2);

        ledger.clear(Some(QueryKind::Database));
        assert!(ledger.is_empty(QueryKind::Database));
        assert_eq!(ledger.len(QueryKind::File), 1);

        ledger.clear(None);
        assert!(ledger.is_empty(QueryKind::File));
    }

    #[test]
    fn query_is_a_restartable_snapshot() {
        let ledger = HistoryLedger::default();
        ledger.append(entry(QueryKind::File, "first", None));
        let snapshot = ledger.query(&HistoryFilter::new());
        ledger.append(entry(QueryKind::File, "second", None));

        assert_eq!(queries(&snapshot), vec!["first"]);
        assert_eq!(queries(&snapshot), vec!["first"]);
        assert_eq!(ledger.query(&HistoryFilter::new()).count(), 2);
    }

    #[test]
    fn filters_and_sorts() {
        let ledger = HistoryLedger::default();
        ledger.append(entry(QueryKind::Database, "SELECT a FROM orders", Some(30)));
        ledger.append(entry(QueryKind::Database, "select b from users", Some(90)));
        ledger.append(entry(QueryKind::Database, "SELECT c FROM Orders", None));

        let filter = HistoryFilter::new().with_search("ORDERS");
        assert_eq!(
            queries(&ledger.query(&filter)),
            vec!["SELECT c FROM Orders", "SELECT a FROM orders"]
        );

        let oldest = ledger.query(&filter.clone().sorted(HistorySort::OldestFirst));
        assert_eq!(queries(&oldest), vec!["SELECT a FROM orders", "SELECT c FROM Orders"]);

        let slowest = ledger.query(&HistoryFilter::new().sorted(HistorySort::SlowestFirst));
        assert_eq!(
            queries(&slowest),
            vec!["select b from users", "SELECT a FROM orders", "SELECT c FROM Orders"]
        );

        let mine = ledger.query(&HistoryFilter::new().with_user("someone-else"));
        assert_eq!(mine.count(), 0);
        let errors = ledger.query(&HistoryFilter::new().with_status(QueryStatus::Error));
        assert_eq!(errors.count(), 3);
    }

    #[test]
    fn date_range_is_half_open() {
        let ledger = HistoryLedger::default();
        let e = entry(QueryKind::File, "q", None);
        let at = e.timestamp;
        ledger.append(e);

        let inclusive = HistoryFilter::new().with_range(Some(at), None);
        assert_eq!(ledger.query(&inclusive).count(), 1);

        let exclusive = HistoryFilter::new().with_range(None, Some(at));
        assert_eq!(ledger.query(&exclusive).count(), 0);

        let around = HistoryFilter::new().with_range(Some(at - Duration::seconds(1)), Some(at + Duration::seconds(1)));
        assert_eq!(ledger.query(&around).count(), 1);
    }

    #[test]
    fn restore_respects_kind_and_capacity() {
        let ledger = HistoryLedger::new(2);
        let persisted = vec![
            entry(QueryKind::File, "new", None),
            entry(QueryKind::Database, "other kind", None),
            entry(QueryKind::File, "mid", None),
            entry(QueryKind::File, "old", None),
        ];
        ledger.restore(QueryKind::File, persisted);
        let restored = ledger.query(&HistoryFilter::new().with_kind(QueryKind::File));
        assert_eq!(queries(&restored), vec!["new", "mid"]);
        assert!(ledger.is_empty(QueryKind::Database));
    }
}
