//! Core types for query governance
//!
//! Defines the records that flow through the orchestrator:
//! - Requests and their targets
//! - Executor output and the validated result payload
//! - Query results and history entries

use crate::error::ExecutionError;
use chrono::{DateTime, Utc};
use qg_policy::Verdict;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use ulid::Ulid;

/// Request parameters passed through to executors
pub type QueryParams = Map<String, Value>;

/// Unique request identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Ulid);

impl RequestId {
    /// Generate new request ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique history entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HistoryEntryId(pub Ulid);

impl HistoryEntryId {
    /// Generate new entry ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for HistoryEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HistoryEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which backend family a request goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// Question over an uploaded file
    File,
    /// Query against a database connection
    Database,
}

impl QueryKind {
    /// Both kinds, in a fixed order
    pub const ALL: [QueryKind; 2] = [QueryKind::File, QueryKind::Database];

    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Database => "database",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

/// Identifier of a database connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseId(pub String);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a request is executed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum QueryTarget {
    /// File executor target
    File(FileId),
    /// Database executor target
    Database(DatabaseId),
}

impl QueryTarget {
    /// Target of the given kind
    #[must_use]
    pub fn for_kind(kind: QueryKind, id: impl Into<String>) -> Self {
        match kind {
            QueryKind::File => Self::File(FileId(id.into())),
            QueryKind::Database => Self::Database(DatabaseId(id.into())),
        }
    }

    /// Kind this target belongs to
    #[inline]
    #[must_use]
    pub fn kind(&self) -> QueryKind {
        match self {
            Self::File(_) => QueryKind::File,
            Self::Database(_) => QueryKind::Database,
        }
    }

    /// Raw identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::File(id) => &id.0,
            Self::Database(id) => &id.0,
        }
    }
}

/// A query submitted for governance and execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Request identifier
    pub id: RequestId,
    /// Backend family
    pub kind: QueryKind,
    /// Query text as the user wrote it (SQL or natural language)
    pub raw_query: String,
    /// Submitting user
    pub user_id: String,
    /// Execution target
    pub target: QueryTarget,
    /// Executor parameters
    #[serde(default)]
    pub params: QueryParams,
    /// Submission time
    pub created_at: DateTime<Utc>,
}

impl QueryRequest {
    /// New request; the kind follows the target
    #[must_use]
    pub fn new(user_id: impl Into<String>, target: QueryTarget, raw_query: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            kind: target.kind(),
            raw_query: raw_query.into(),
            user_id: user_id.into(),
            target,
            params: QueryParams::new(),
            created_at: Utc::now(),
        }
    }

    /// New database request
    #[inline]
    #[must_use]
    pub fn database(
        user_id: impl Into<String>,
        database_id: impl Into<String>,
        raw_query: impl Into<String>,
    ) -> Self {
        Self::new(user_id, QueryTarget::Database(DatabaseId(database_id.into())), raw_query)
    }

    /// New file request
    #[inline]
    #[must_use]
    pub fn file(
        user_id: impl Into<String>,
        file_id: impl Into<String>,
        raw_query: impl Into<String>,
    ) -> Self {
        Self::new(user_id, QueryTarget::File(FileId(file_id.into())), raw_query)
    }

    /// With one executor parameter
    #[inline]
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Outcome status of a finished request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Executed and returned a payload
    Success,
    /// Blocked, failed or timed out
    Error,
}

/// Result data returned by an executor
///
/// Backends hand back loosely shaped JSON; [`ResultPayload::from_value`]
/// is the only way such JSON enters the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultPayload {
    /// Tabular rows
    Rows {
        /// Column names
        columns: Vec<String>,
        /// Row values, one entry per column
        rows: Vec<Vec<Value>>,
    },
    /// Answer to a question over a document
    Document {
        /// Generated answer text
        answer: String,
        /// Passages or references backing the answer
        #[serde(default)]
        sources: Vec<String>,
    },
    /// Statement with no result set
    Empty,
}

impl ResultPayload {
    /// Decode and check raw backend JSON
    ///
    /// # Errors
    /// [`ExecutionError::InvalidPayload`] when the JSON has no known `kind`,
    /// is missing fields, or has rows whose width differs from the columns.
    pub fn from_value(value: Value) -> Result<Self, ExecutionError> {
        let payload: Self = serde_json::from_value(value)
            .map_err(|e| ExecutionError::InvalidPayload(e.to_string()))?;
        payload.check()?;
        Ok(payload)
    }

    /// Check that every row is as wide as the column list
    ///
    /// # Errors
    /// [`ExecutionError::InvalidPayload`] naming the first ragged row.
    pub fn check(&self) -> Result<(), ExecutionError> {
        if let Self::Rows { columns, rows } = self {
            if let Some(pos) = rows.iter().position(|row| row.len() != columns.len()) {
                return Err(ExecutionError::InvalidPayload(format!(
                    "row {pos} has {} values for {} columns",
                    rows[pos].len(),
                    columns.len()
                )));
            }
        }
        Ok(())
    }

    /// Number of rows, when the payload is tabular or empty
    #[must_use]
    pub fn row_count(&self) -> Option<usize> {
        match self {
            Self::Rows { rows, .. } => Some(rows.len()),
            Self::Empty => Some(0),
            Self::Document { .. } => None,
        }
    }

    /// Column names of a tabular payload
    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            Self::Rows { columns, .. } => columns,
            Self::Document { .. } | Self::Empty => &[],
        }
    }
}

/// What an executor hands back on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    /// Result data
    pub payload: ResultPayload,
    /// Backend-reported execution time
    pub execution_time_ms: u64,
}

impl ExecutionOutput {
    /// Create new output
    #[inline]
    #[must_use]
    pub fn new(payload: ResultPayload, execution_time_ms: u64) -> Self {
        Self {
            payload,
            execution_time_ms,
        }
    }
}

/// Result metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    /// Rows returned, when meaningful
    pub row_count: Option<usize>,
    /// Column names
    pub columns: Vec<String>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

/// Final result of one executed (or failed) request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Request this result belongs to
    pub request_id: RequestId,
    /// Success or error
    pub status: QueryStatus,
    /// Result data on success
    pub payload: Option<ResultPayload>,
    /// Metadata
    pub metadata: QueryMetadata,
    /// Consolidated error message on failure
    pub error_message: Option<String>,
}

impl QueryResult {
    /// Successful result from executor output
    #[must_use]
    pub fn success(request_id: RequestId, output: ExecutionOutput) -> Self {
        Self {
            request_id,
            status: QueryStatus::Success,
            metadata: QueryMetadata {
                row_count: output.payload.row_count(),
                columns: output.payload.columns().to_vec(),
                execution_time_ms: output.execution_time_ms,
            },
            payload: Some(output.payload),
            error_message: None,
        }
    }

    /// Failed result
    #[must_use]
    pub fn failure(request_id: RequestId, message: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            request_id,
            status: QueryStatus::Error,
            payload: None,
            metadata: QueryMetadata {
                execution_time_ms,
                ..QueryMetadata::default()
            },
            error_message: Some(message.into()),
        }
    }

    /// Check if the request succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

/// Compact record of one finished request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Entry identifier
    pub id: HistoryEntryId,
    /// Request the entry records
    pub request_id: RequestId,
    /// Backend family
    pub kind: QueryKind,
    /// Query text
    pub raw_query: String,
    /// Submitting user
    pub user_id: String,
    /// Execution target
    pub target: QueryTarget,
    /// Time the request reached its terminal state
    pub timestamp: DateTime<Utc>,
    /// Success or error
    pub status: QueryStatus,
    /// Execution time, when the request reached an executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Rows returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Error or violation summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HistoryEntry {
    fn base(request: &QueryRequest, status: QueryStatus) -> Self {
        Self {
            id: HistoryEntryId::new(),
            request_id: request.id,
            kind: request.kind,
            raw_query: request.raw_query.clone(),
            user_id: request.user_id.clone(),
            target: request.target.clone(),
            timestamp: Utc::now(),
            status,
            execution_time_ms: None,
            row_count: None,
            error_message: None,
        }
    }

    /// Entry for an executed (or failed) request
    #[must_use]
    pub fn from_result(request: &QueryRequest, result: &QueryResult) -> Self {
        Self {
            execution_time_ms: Some(result.metadata.execution_time_ms),
            row_count: result.metadata.row_count,
            error_message: result.error_message.clone(),
            ..Self::base(request, result.status)
        }
    }

    /// Entry for a request blocked by policy
    #[must_use]
    pub fn blocked(request: &QueryRequest, verdict: &Verdict) -> Self {
        Self {
            error_message: Some(verdict.summary()),
            ..Self::base(request, QueryStatus::Error)
        }
    }

    /// Fresh request with the same kind, query, user and target
    #[must_use]
    pub fn replay(&self) -> QueryRequest {
        QueryRequest::new(self.user_id.clone(), self.target.clone(), self.raw_query.clone())
    }
}
