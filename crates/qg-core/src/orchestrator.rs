//! Query orchestrator
//!
//! Composes the policy layer, the collaborators and the session stores:
//! - Fetches the user's rule document and parses it (through the cache)
//! - Validates the query and blocks it on any violation
//! - Runs valid queries on the matching executor
//! - Records exactly one history entry per finished request
//!
//! Each query kind has one request slot. A slot holding a validating or
//! executing request refuses new submissions of that kind.

use crate::collaborators::{DatabaseExecutor, FileExecutor, RulesProvider};
use crate::config::OrchestratorConfig;
use crate::error::{ConfigError, ExecutionError, GovernanceError, RegistryError, RulesError, TransitionError};
use crate::history::{HistoryFilter, HistoryQuery};
use crate::saved::{NewSavedQuery, SavedQuery, SavedQueryFilter, SavedQueryId, SavedQueryPatch};
use crate::session::SessionContext;
use crate::state::{validate_transition, RequestState};
use crate::types::{ExecutionOutput, HistoryEntry, QueryKind, QueryRequest, QueryResult, QueryTarget, RequestId};
use dashmap::DashMap;
use parking_lot::Mutex;
use qg_policy::{ParseError, RuleSet, RuleSetCache, Validator, Verdict};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a submission ended with
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Rejected by policy; nothing was executed
    Blocked(Verdict),
    /// Reached an executor (or failed trying)
    Completed(QueryResult),
}

impl SubmitOutcome {
    /// Check if the query was blocked
    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }

    /// Verdict of a blocked query
    #[inline]
    #[must_use]
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Blocked(verdict) => Some(verdict),
            Self::Completed(_) => None,
        }
    }

    /// Result of a completed query
    #[inline]
    #[must_use]
    pub fn result(&self) -> Option<&QueryResult> {
        match self {
            Self::Blocked(_) => None,
            Self::Completed(result) => Some(result),
        }
    }
}

/// Backends the orchestrator delegates to
#[derive(Clone)]
pub struct Collaborators {
    /// Rule document source
    pub rules: Arc<dyn RulesProvider>,
    /// File question executor
    pub files: Arc<dyn FileExecutor>,
    /// Database query executor
    pub databases: Arc<dyn DatabaseExecutor>,
}

impl Collaborators {
    /// Create new collaborator set
    #[inline]
    #[must_use]
    pub fn new(
        rules: Arc<dyn RulesProvider>,
        files: Arc<dyn FileExecutor>,
        databases: Arc<dyn DatabaseExecutor>,
    ) -> Self {
        Self {
            rules,
            files,
            databases,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: RequestState,
    request: Option<Arc<QueryRequest>>,
}

impl Slot {
    fn transition(&mut self, to: RequestState) -> Result<(), TransitionError> {
        validate_transition(self.state, to)?;
        tracing::trace!(from = %self.state, %to, "transition");
        self.state = to;
        Ok(())
    }

    fn tracks(&self, id: RequestId) -> bool {
        self.request.as_ref().is_some_and(|r| r.id == id)
    }

    fn request_id(&self) -> Option<RequestId> {
        self.request.as_ref().map(|r| r.id)
    }
}

#[derive(Debug, Default)]
struct Slots {
    file: Slot,
    database: Slot,
}

impl Slots {
    fn get(&self, kind: QueryKind) -> &Slot {
        match kind {
            QueryKind::File => &self.file,
            QueryKind::Database => &self.database,
        }
    }

    fn get_mut(&mut self, kind: QueryKind) -> &mut Slot {
        match kind {
            QueryKind::File => &mut self.file,
            QueryKind::Database => &mut self.database,
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: OrchestratorConfig,
    session: SessionContext,
    collaborators: Collaborators,
    cache: RuleSetCache,
    validator: Validator,
    last_good: DashMap<String, Arc<RuleSet>>,
    slots: Mutex<Slots>,
}

/// Policy-checked query orchestrator
///
/// Cheap to clone; clones share slots, session and collaborators.
#[derive(Debug, Clone)]
pub struct QueryOrchestrator {
    inner: Arc<Inner>,
}

impl QueryOrchestrator {
    /// Create orchestrator with a fresh session sized by `config`
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] when `config` fails validation.
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        let session = SessionContext::new(config.history_capacity);
        Self::with_session(config, session, collaborators)
    }

    /// Create orchestrator over an existing session
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] when `config` fails validation or the
    /// session's history capacity differs from `config.history_capacity`.
    pub fn with_session(
        config: OrchestratorConfig,
        session: SessionContext,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = session.history().capacity();
        if capacity != config.history_capacity {
            return Err(ConfigError::Invalid(format!(
                "session history capacity {capacity} does not match history_capacity {}",
                config.history_capacity
            )));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                cache: RuleSetCache::new(config.rule_cache_capacity),
                config,
                session,
                collaborators,
                validator: Validator::new(),
                last_good: DashMap::new(),
                slots: Mutex::new(Slots::default()),
            }),
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Session stores
    #[inline]
    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.inner.session
    }

    /// Submit a query for validation and execution
    ///
    /// Resolves once the request reaches a terminal state (or the soft
    /// timeout fires). Executor and rules-provider failures come back as a
    /// failed [`QueryResult`], not as `Err`.
    ///
    /// # Errors
    /// - [`GovernanceError::InvalidState`] when a request of the same kind is
    ///   still validating or executing; nothing else happens
    /// - [`GovernanceError::Parse`] when the rule document does not parse and
    ///   no earlier rule set exists for the user; the slot returns to idle
    /// - [`GovernanceError::TargetMismatch`] when `request.kind` disagrees
    ///   with its target
    pub async fn submit_query(&self, request: QueryRequest) -> Result<SubmitOutcome, GovernanceError> {
        let kind = request.kind;
        if request.target.kind() != kind {
            return Err(GovernanceError::TargetMismatch {
                kind,
                target: request.target.kind(),
            });
        }

        let request = Arc::new(request);
        self.inner.begin(&request)?;
        let _abort_on_drop = ValidationGuard {
            inner: self.inner.as_ref(),
            kind,
            request_id: request.id,
        };
        tracing::info!(request_id = %request.id, %kind, user = %request.user_id, "query submitted");

        let rules = if self.inner.config.policy_scope.applies(kind) {
            match self.inner.collaborators.rules.get_rules(&request.user_id).await {
                Ok(text) => Some(self.inner.rule_set_for(&request.user_id, &text)?),
                Err(err) => {
                    return Ok(SubmitOutcome::Completed(self.inner.fail_closed(&request, &err)?));
                }
            }
        } else {
            tracing::debug!(%kind, "kind outside policy scope, skipping validation");
            None
        };

        let verdict = rules.map_or_else(Verdict::allow, |set| {
            self.inner.validator.validate(&request.raw_query, &set)
        });
        if !verdict.is_valid() {
            self.inner.block(&request, &verdict)?;
            return Ok(SubmitOutcome::Blocked(verdict));
        }

        self.inner.start_execution(&request)?;
        let result = self.run_executor(request).await;
        Ok(SubmitOutcome::Completed(result))
    }

    async fn run_executor(&self, request: Arc<QueryRequest>) -> QueryResult {
        let inner = Arc::clone(&self.inner);
        let task_request = Arc::clone(&request);
        let mut handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = inner.execute(&task_request).await;
            inner.complete(&task_request, outcome, started.elapsed())
        });

        let joined = match self.inner.config.execution_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => return self.inner.time_out(&request, limit),
            },
            None => handle.await,
        };

        joined.unwrap_or_else(|err| {
            let reason = if err.is_panic() { "executor panicked" } else { "executor cancelled" };
            self.inner.complete(
                &request,
                Err(ExecutionError::Aborted(reason.to_string())),
                Duration::ZERO,
            )
        })
    }

    /// Return a finished slot to idle
    ///
    /// Idle slots are left as they are.
    ///
    /// # Errors
    /// [`GovernanceError::InvalidState`] while a request is validating or
    /// executing.
    pub fn reset(&self, kind: QueryKind) -> Result<(), GovernanceError> {
        let mut slots = self.inner.slots.lock();
        let slot = slots.get_mut(kind);
        match slot.state {
            RequestState::Idle => Ok(()),
            state if state.is_in_flight() => Err(GovernanceError::InvalidState {
                kind,
                state,
                request_id: slot.request_id(),
            }),
            _ => {
                slot.transition(RequestState::Idle)?;
                slot.request = None;
                tracing::debug!(%kind, "slot reset");
                Ok(())
            }
        }
    }

    /// Current state of the slot for `kind`
    #[must_use]
    pub fn state(&self, kind: QueryKind) -> RequestState {
        self.inner.slots.lock().get(kind).state
    }

    /// Request tracked by the slot for `kind`
    #[must_use]
    pub fn tracked_request(&self, kind: QueryKind) -> Option<Arc<QueryRequest>> {
        self.inner.slots.lock().get(kind).request.clone()
    }

    /// History of `kind`, optionally narrowed by `filter`
    #[must_use]
    pub fn get_history(&self, kind: QueryKind, filter: Option<HistoryFilter>) -> HistoryQuery {
        let filter = filter.unwrap_or_default().with_kind(kind);
        self.inner.session.history().query(&filter)
    }

    /// Clear the history of one kind, or all of it
    pub fn clear_history(&self, kind: Option<QueryKind>) {
        self.inner.session.history().clear(kind);
    }

    /// Store a query template
    ///
    /// # Errors
    /// [`RegistryError::Invalid`] for an empty name or query.
    pub fn save_query(&self, input: NewSavedQuery) -> Result<SavedQuery, RegistryError> {
        self.inner.session.saved().create(input)
    }

    /// Update a stored template
    ///
    /// # Errors
    /// [`RegistryError::NotFound`] for an unknown id,
    /// [`RegistryError::Invalid`] when the patch empties a required field.
    pub fn update_saved_query(&self, id: &SavedQueryId, patch: SavedQueryPatch) -> Result<SavedQuery, RegistryError> {
        self.inner.session.saved().update(id, patch)
    }

    /// Delete a stored template; unknown ids are ignored
    pub fn delete_saved_query(&self, id: &SavedQueryId) {
        self.inner.session.saved().delete(id);
    }

    /// Stored templates, most recently updated first
    #[must_use]
    pub fn list_saved_queries(&self, filter: Option<&SavedQueryFilter>) -> Vec<SavedQuery> {
        let default = SavedQueryFilter::default();
        self.inner.session.saved().list(filter.unwrap_or(&default))
    }
}

impl Inner {
    /// Claim the slot and enter `Validating`
    fn begin(&self, request: &Arc<QueryRequest>) -> Result<(), GovernanceError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(request.kind);
        if slot.state.is_in_flight() {
            tracing::debug!(kind = %request.kind, state = %slot.state, "submission refused");
            return Err(GovernanceError::InvalidState {
                kind: request.kind,
                state: slot.state,
                request_id: slot.request_id(),
            });
        }
        slot.transition(RequestState::Validating)?;
        slot.request = Some(Arc::clone(request));
        Ok(())
    }

    /// Parsed rule set for `text`, falling back to the user's last good one
    fn rule_set_for(&self, user_id: &str, text: &str) -> Result<Arc<RuleSet>, ParseError> {
        match self.cache.get_or_parse(text) {
            Ok(set) => {
                self.last_good.insert(user_id.to_string(), Arc::clone(&set));
                Ok(set)
            }
            Err(err) => match self.last_good.get(user_id) {
                Some(previous) => {
                    tracing::warn!(
                        user = %user_id,
                        error = %err,
                        version = previous.version().short(),
                        "rule document failed to parse, using previous rule set"
                    );
                    Ok(Arc::clone(previous.value()))
                }
                None => {
                    tracing::warn!(user = %user_id, error = %err, "rule document failed to parse");
                    Err(err)
                }
            },
        }
    }

    fn block(&self, request: &QueryRequest, verdict: &Verdict) -> Result<(), TransitionError> {
        let mut slots = self.slots.lock();
        slots.get_mut(request.kind).transition(RequestState::Blocked)?;
        self.session.history().append(HistoryEntry::blocked(request, verdict));
        drop(slots);
        tracing::info!(
            request_id = %request.id,
            violations = verdict.violations().len(),
            "query blocked by policy"
        );
        Ok(())
    }

    fn fail_closed(&self, request: &QueryRequest, err: &RulesError) -> Result<QueryResult, TransitionError> {
        let result = QueryResult::failure(request.id, err.to_string(), 0);
        let mut slots = self.slots.lock();
        slots.get_mut(request.kind).transition(RequestState::Failed)?;
        self.session.history().append(HistoryEntry::from_result(request, &result));
        drop(slots);
        tracing::error!(request_id = %request.id, error = %err, "rules unavailable, query refused");
        Ok(result)
    }

    fn start_execution(&self, request: &QueryRequest) -> Result<(), TransitionError> {
        self.slots.lock().get_mut(request.kind).transition(RequestState::Executing)?;
        tracing::debug!(request_id = %request.id, target = %request.target.id(), "executing");
        Ok(())
    }

    async fn execute(&self, request: &QueryRequest) -> Result<ExecutionOutput, ExecutionError> {
        match &request.target {
            QueryTarget::File(id) => {
                self.collaborators
                    .files
                    .execute(id, &request.raw_query, &request.params)
                    .await
            }
            QueryTarget::Database(id) => {
                self.collaborators
                    .databases
                    .execute(id, &request.raw_query, &request.params)
                    .await
            }
        }
    }

    /// Record an executor outcome unless the slot has moved on
    fn complete(
        &self,
        request: &QueryRequest,
        outcome: Result<ExecutionOutput, ExecutionError>,
        elapsed: Duration,
    ) -> QueryResult {
        let result = match outcome.and_then(|output| output.payload.check().map(|()| output)) {
            Ok(output) => QueryResult::success(request.id, output),
            Err(err) => QueryResult::failure(request.id, err.to_string(), millis(elapsed)),
        };

        let mut slots = self.slots.lock();
        let slot = slots.get_mut(request.kind);
        if !slot.tracks(request.id) || slot.state != RequestState::Executing {
            tracing::debug!(request_id = %request.id, state = %slot.state, "discarding stale result");
            return result;
        }
        let to = if result.is_success() {
            RequestState::Succeeded
        } else {
            RequestState::Failed
        };
        if let Err(err) = slot.transition(to) {
            tracing::error!(request_id = %request.id, error = %err, "cannot record result");
            return result;
        }
        self.session.history().append(HistoryEntry::from_result(request, &result));
        drop(slots);

        match &result.error_message {
            None => tracing::info!(
                request_id = %request.id,
                rows = ?result.metadata.row_count,
                ms = result.metadata.execution_time_ms,
                "query succeeded"
            ),
            Some(message) => tracing::warn!(request_id = %request.id, error = %message, "query failed"),
        }
        result
    }

    /// Fail a request whose executor is still running
    fn time_out(&self, request: &QueryRequest, limit: Duration) -> QueryResult {
        let after_ms = millis(limit);
        tracing::warn!(request_id = %request.id, after_ms, "execution timed out");
        self.complete(request, Err(ExecutionError::Timeout { after_ms }), limit)
    }

    /// Return a still-validating request's slot to idle
    fn abort(&self, kind: QueryKind, request_id: RequestId) {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(kind);
        if !slot.tracks(request_id) || slot.state != RequestState::Validating {
            return;
        }
        if slot.transition(RequestState::Idle).is_ok() {
            slot.request = None;
            tracing::debug!(%request_id, %kind, "validation aborted");
        }
    }
}

/// Aborts the slot if submission stops while still validating
struct ValidationGuard<'a> {
    inner: &'a Inner,
    kind: QueryKind,
    request_id: RequestId,
}

impl Drop for ValidationGuard<'_> {
    fn drop(&mut self) {
        self.inner.abort(self.kind, self.request_id);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
