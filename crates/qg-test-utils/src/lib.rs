//! Testing utilities for the query governance workspace
//!
//! Shared executors, fixtures and setup helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use qg_core::{
    Collaborators, DatabaseExecutor, DatabaseId, ExecutionError, ExecutionOutput, FileExecutor,
    FileId, InMemoryRules, OrchestratorConfig, QueryOrchestrator, QueryParams, QueryRequest,
    ResultPayload, RulesError, RulesProvider,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const TEST_USER: &str = "analyst";
pub const TEST_DATABASE: &str = "warehouse";
pub const TEST_FILE: &str = "report.pdf";

pub type Outcome = Result<ExecutionOutput, ExecutionError>;

/// Executor answering from a script, then from a fallback outcome
#[derive(Debug)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    started: Notify,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn returning(output: ExecutionOutput) -> Self {
        Self::with_fallback(Ok(output))
    }

    pub fn rows(n: usize) -> Self {
        Self::returning(rows_output(n))
    }

    pub fn failing(err: ExecutionError) -> Self {
        Self::with_fallback(Err(err))
    }

    fn with_fallback(fallback: Outcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            gate: None,
            started: Notify::new(),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Answer the next unanswered call with `outcome`
    #[must_use]
    pub fn then(self, outcome: Outcome) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    /// Sleep before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every call until the gate is notified
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    /// Resolves once a call has entered the executor
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    async fn run(&self, query: &str) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.to_string());
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl FileExecutor for ScriptedExecutor {
    async fn execute(&self, _file_id: &FileId, query: &str, _params: &QueryParams) -> Outcome {
        self.run(query).await
    }
}

#[async_trait]
impl DatabaseExecutor for ScriptedExecutor {
    async fn execute(&self, _database_id: &DatabaseId, query: &str, _params: &QueryParams) -> Outcome {
        self.run(query).await
    }
}

/// Rules provider that is always down
#[derive(Debug, Default)]
pub struct UnavailableRules;

#[async_trait]
impl RulesProvider for UnavailableRules {
    async fn get_rules(&self, _user_id: &str) -> Result<String, RulesError> {
        Err(RulesError::Unavailable("connection refused".to_string()))
    }
}

pub fn rows_payload(n: usize) -> ResultPayload {
    ResultPayload::Rows {
        columns: vec!["id".to_string(), "name".to_string()],
        rows: (0..n).map(|i| vec![json!(i), json!(format!("row-{i}"))]).collect(),
    }
}

pub fn rows_output(n: usize) -> ExecutionOutput {
    ExecutionOutput::new(rows_payload(n), 5)
}

pub fn document_output(answer: &str) -> ExecutionOutput {
    ExecutionOutput::new(
        ResultPayload::Document {
            answer: answer.to_string(),
            sources: vec!["page 1".to_string()],
        },
        8,
    )
}

pub fn database_request(query: &str) -> QueryRequest {
    QueryRequest::database(TEST_USER, TEST_DATABASE, query)
}

pub fn file_request(query: &str) -> QueryRequest {
    QueryRequest::file(TEST_USER, TEST_FILE, query)
}

/// Orchestrator whose users all share `rules_text`, with one executor for both kinds
pub fn setup_orchestrator(
    rules_text: &str,
    executor: Arc<ScriptedExecutor>,
    config: OrchestratorConfig,
) -> (QueryOrchestrator, Arc<InMemoryRules>) {
    let rules = Arc::new(InMemoryRules::new().with_fallback(rules_text));
    let orchestrator = QueryOrchestrator::new(
        config,
        Collaborators::new(rules.clone(), executor.clone(), executor),
    )
    .expect("valid test configuration");
    (orchestrator, rules)
}
