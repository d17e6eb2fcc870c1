//! End-to-end orchestrator behaviour over scripted collaborators

use pretty_assertions::assert_eq;
use qg_core::{
    Collaborators, ExecutionError, GovernanceError, HistoryFilter, InMemoryRules, NewSavedQuery,
    OrchestratorConfig, QueryKind, QueryOrchestrator, QueryStatus, RequestState, RulesError,
    RulesProvider, SavedQueryFilter, SavedQueryId, SavedQueryPatch, SubmitOutcome,
};
use qg_test_utils::{
    database_request, file_request, setup_orchestrator, ScriptedExecutor, UnavailableRules,
    TEST_DATABASE, TEST_USER,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn default_setup(rules: &str, executor: &Arc<ScriptedExecutor>) -> (QueryOrchestrator, Arc<InMemoryRules>) {
    setup_orchestrator(rules, Arc::clone(executor), OrchestratorConfig::default())
}

#[tokio::test]
async fn delete_is_blocked_and_never_executed() {
    let executor = Arc::new(ScriptedExecutor::rows(1));
    let (orch, _) = default_setup("no DELETE statements allowed", &executor);

    let outcome = orch
        .submit_query(database_request("DELETE FROM orders"))
        .await
        .unwrap();

    let verdict = outcome.verdict().expect("blocked");
    assert!(!verdict.is_valid());
    assert_eq!(verdict.violations().len(), 1);
    assert_eq!(executor.calls(), 0);
    assert_eq!(orch.state(QueryKind::Database), RequestState::Blocked);

    let history = orch.get_history(QueryKind::Database, None).to_vec();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, QueryStatus::Error);
    assert_eq!(history[0].error_message.as_deref(), Some("no DELETE statements allowed"));
}

#[tokio::test]
async fn bare_truncate_never_reaches_the_executor() {
    let executor = Arc::new(ScriptedExecutor::rows(0));
    let (orch, _) = default_setup("forbid: TRUNCATE", &executor);

    let outcome = orch
        .submit_query(database_request("TRUNCATE audit_log"))
        .await
        .unwrap();

    assert!(outcome.is_blocked());
    assert_eq!(executor.calls(), 0);
    assert_eq!(orch.state(QueryKind::Database), RequestState::Blocked);
    let history = orch.get_history(QueryKind::Database, None).to_vec();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error_message.as_deref(), Some("forbid: TRUNCATE"));
}

#[tokio::test]
async fn empty_rules_allow_any_query() {
    let executor = Arc::new(ScriptedExecutor::rows(0));
    let (orch, _) = default_setup("", &executor);

    for query in ["DROP TABLE users", "DELETE FROM orders", "UPDATE t SET a = 1"] {
        let outcome = orch.submit_query(database_request(query)).await.unwrap();
        assert!(!outcome.is_blocked(), "{query}");
    }
    assert_eq!(executor.calls(), 3);
}

#[tokio::test]
async fn five_rows_make_one_success_entry() {
    let executor = Arc::new(ScriptedExecutor::rows(5));
    let (orch, _) = default_setup("queries must include a row limit", &executor);

    let outcome = orch
        .submit_query(database_request("SELECT * FROM orders LIMIT 5"))
        .await
        .unwrap();

    let SubmitOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert!(result.is_success());
    assert_eq!(result.metadata.row_count, Some(5));
    assert_eq!(result.metadata.columns, vec!["id", "name"]);
    assert_eq!(orch.state(QueryKind::Database), RequestState::Succeeded);

    let history = orch.get_history(QueryKind::Database, None).to_vec();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, QueryStatus::Success);
    assert_eq!(history[0].row_count, Some(5));
    assert_eq!(history[0].execution_time_ms, Some(5));
}

#[tokio::test]
async fn second_submission_is_refused_while_executing() {
    let gate = Arc::new(Notify::new());
    let executor = Arc::new(ScriptedExecutor::rows(2).with_gate(Arc::clone(&gate)));
    let (orch, _) = default_setup("", &executor);

    let first = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.submit_query(database_request("SELECT 1 FROM t")).await })
    };
    executor.wait_started().await;
    assert_eq!(orch.state(QueryKind::Database), RequestState::Executing);
    let tracked = orch.tracked_request(QueryKind::Database).unwrap();

    let err = orch
        .submit_query(database_request("SELECT 2 FROM t"))
        .await
        .unwrap_err();
    match &err {
        GovernanceError::InvalidState {
            kind,
            state,
            request_id,
        } => {
            assert_eq!(*kind, QueryKind::Database);
            assert_eq!(*state, RequestState::Executing);
            assert_eq!(*request_id, Some(tracked.id));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_recoverable());
    assert_eq!(orch.get_history(QueryKind::Database, None).count(), 0);
    assert!(orch.reset(QueryKind::Database).is_err());

    gate.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(outcome.result().unwrap().is_success());
    assert_eq!(executor.calls(), 1);
    assert_eq!(orch.get_history(QueryKind::Database, None).count(), 1);
}

#[tokio::test]
async fn kinds_do_not_block_each_other() {
    let gate = Arc::new(Notify::new());
    let databases = Arc::new(ScriptedExecutor::rows(1).with_gate(Arc::clone(&gate)));
    let files = Arc::new(ScriptedExecutor::returning(qg_test_utils::document_output("fine")));
    let orch = QueryOrchestrator::new(
        OrchestratorConfig::default(),
        Collaborators::new(Arc::new(InMemoryRules::new()), files.clone(), databases.clone()),
    )
    .unwrap();

    let pending = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.submit_query(database_request("SELECT * FROM t")).await })
    };
    databases.wait_started().await;

    let outcome = orch
        .submit_query(file_request("what does the report say?"))
        .await
        .unwrap();
    assert!(outcome.result().unwrap().is_success());
    assert_eq!(orch.state(QueryKind::File), RequestState::Succeeded);
    assert_eq!(orch.state(QueryKind::Database), RequestState::Executing);

    gate.notify_one();
    pending.await.unwrap().unwrap();
    assert_eq!(orch.state(QueryKind::Database), RequestState::Succeeded);
}

#[tokio::test]
async fn timed_out_result_is_discarded_on_arrival() {
    let executor = Arc::new(ScriptedExecutor::rows(3).with_delay(Duration::from_millis(300)));
    let config = OrchestratorConfig::default().with_execution_timeout(Duration::from_millis(50));
    let (orch, _) = setup_orchestrator("", Arc::clone(&executor), config);

    let outcome = orch
        .submit_query(database_request("SELECT * FROM slow_view"))
        .await
        .unwrap();
    let result = outcome.result().unwrap();
    assert!(!result.is_success());
    assert_eq!(
        result.error_message.as_deref(),
        Some("execution timed out after 50ms")
    );
    assert_eq!(orch.state(QueryKind::Database), RequestState::Failed);

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(orch.state(QueryKind::Database), RequestState::Failed);
    let history = orch.get_history(QueryKind::Database, None).to_vec();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, QueryStatus::Error);
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn late_result_does_not_touch_the_next_request() {
    let gate = Arc::new(Notify::new());
    let executor = Arc::new(
        ScriptedExecutor::rows(3)
            .then(Ok(qg_test_utils::rows_output(9)))
            .with_gate(Arc::clone(&gate)),
    );
    let config = OrchestratorConfig::default().with_execution_timeout(Duration::from_millis(300));
    let (orch, _) = setup_orchestrator("", Arc::clone(&executor), config);

    let first = orch
        .submit_query(database_request("SELECT * FROM slow_view"))
        .await
        .unwrap();
    assert!(!first.result().unwrap().is_success());
    executor.wait_started().await;
    orch.reset(QueryKind::Database).unwrap();

    let second = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.submit_query(database_request("SELECT * FROM fast_view")).await })
    };
    executor.wait_started().await;
    let tracked = orch.tracked_request(QueryKind::Database).unwrap();
    assert_eq!(tracked.raw_query, "SELECT * FROM fast_view");

    // releases the timed-out call, which resolves with 9 rows
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(orch.state(QueryKind::Database), RequestState::Executing);
    assert_eq!(orch.tracked_request(QueryKind::Database).unwrap().id, tracked.id);
    assert_eq!(orch.get_history(QueryKind::Database, None).count(), 1);

    gate.notify_one();
    let outcome = second.await.unwrap().unwrap();
    let result = outcome.result().unwrap();
    assert!(result.is_success());
    assert_eq!(result.request_id, tracked.id);
    assert_eq!(result.metadata.row_count, Some(3));
    assert_eq!(orch.state(QueryKind::Database), RequestState::Succeeded);

    let history = orch.get_history(QueryKind::Database, None).to_vec();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].raw_query, "SELECT * FROM fast_view");
    assert_eq!(history[0].row_count, Some(3));
    assert_eq!(history[1].raw_query, "SELECT * FROM slow_view");
    assert_eq!(history[1].status, QueryStatus::Error);
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn ragged_rows_fail_the_request() {
    let executor = Arc::new(ScriptedExecutor::returning(qg_core::ExecutionOutput::new(
        qg_core::ResultPayload::Rows {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![vec![serde_json::json!(1)]],
        },
        4,
    )));
    let (orch, _) = default_setup("", &executor);

    let outcome = orch
        .submit_query(database_request("SELECT id, name FROM t"))
        .await
        .unwrap();
    let result = outcome.result().unwrap();
    assert!(!result.is_success());
    assert_eq!(result.metadata.row_count, None);
    assert_eq!(orch.state(QueryKind::Database), RequestState::Failed);
    assert_eq!(
        orch.get_history(QueryKind::Database, None).to_vec()[0].error_message.as_deref(),
        Some("invalid result payload: row 0 has 1 values for 2 columns")
    );
}

#[tokio::test]
async fn executor_failure_becomes_failed_entry() {
    let executor = Arc::new(ScriptedExecutor::failing(ExecutionError::Backend(
        "relation \"ordrs\" does not exist".to_string(),
    )));
    let (orch, _) = default_setup("", &executor);

    let outcome = orch
        .submit_query(database_request("SELECT * FROM ordrs"))
        .await
        .unwrap();
    assert!(!outcome.result().unwrap().is_success());
    assert_eq!(orch.state(QueryKind::Database), RequestState::Failed);

    let history = orch.get_history(QueryKind::Database, None).to_vec();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].error_message.as_deref(),
        Some("backend error: relation \"ordrs\" does not exist")
    );
}

#[tokio::test]
async fn unparseable_rules_reuse_previous_rule_set() {
    let executor = Arc::new(ScriptedExecutor::rows(1));
    let (orch, rules) = default_setup("", &executor);
    rules.set_rules(TEST_USER, "no DELETE statements");

    let outcome = orch.submit_query(database_request("DELETE FROM orders")).await.unwrap();
    assert!(outcome.is_blocked());

    rules.set_rules(TEST_USER, "no DELETE statements\nmax rows: plenty");
    let outcome = orch.submit_query(database_request("DELETE FROM orders")).await.unwrap();
    assert!(outcome.is_blocked());

    let outcome = orch.submit_query(database_request("SELECT * FROM orders")).await.unwrap();
    assert!(!outcome.is_blocked());
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn unparseable_rules_without_history_abort() {
    let executor = Arc::new(ScriptedExecutor::rows(1));
    let (orch, _) = default_setup("return at most ten rows", &executor);

    let err = orch
        .submit_query(database_request("SELECT * FROM orders"))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Parse(_)));
    assert_eq!(orch.state(QueryKind::Database), RequestState::Idle);
    assert!(orch.tracked_request(QueryKind::Database).is_none());
    assert_eq!(orch.get_history(QueryKind::Database, None).count(), 0);
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn unavailable_rules_fail_closed() {
    let executor = Arc::new(ScriptedExecutor::rows(1));
    let orch = QueryOrchestrator::new(
        OrchestratorConfig::default(),
        Collaborators::new(Arc::new(UnavailableRules), executor.clone(), executor.clone()),
    )
    .unwrap();

    let outcome = orch.submit_query(file_request("summarize")).await.unwrap();
    let result = outcome.result().unwrap();
    assert!(!result.is_success());
    assert_eq!(
        result.error_message.as_deref(),
        Some("rules provider unavailable: connection refused")
    );
    assert_eq!(orch.state(QueryKind::File), RequestState::Failed);
    assert_eq!(orch.get_history(QueryKind::File, None).count(), 1);
    assert_eq!(executor.calls(), 0);
}

struct StalledRules;

#[async_trait::async_trait]
impl RulesProvider for StalledRules {
    async fn get_rules(&self, _user_id: &str) -> Result<String, RulesError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(String::new())
    }
}

#[tokio::test]
async fn dropping_a_validating_submission_frees_the_slot() {
    let executor = Arc::new(ScriptedExecutor::rows(1));
    let orch = QueryOrchestrator::new(
        OrchestratorConfig::default(),
        Collaborators::new(Arc::new(StalledRules), executor.clone(), executor.clone()),
    )
    .unwrap();

    let attempt = tokio::time::timeout(
        Duration::from_millis(20),
        orch.submit_query(database_request("SELECT 1 FROM t")),
    )
    .await;
    assert!(attempt.is_err());
    assert_eq!(orch.state(QueryKind::Database), RequestState::Idle);
    assert!(orch.tracked_request(QueryKind::Database).is_none());
    assert_eq!(orch.get_history(QueryKind::Database, None).count(), 0);
}

#[tokio::test]
async fn terminal_request_is_replaced_by_next_submission() {
    let executor = Arc::new(ScriptedExecutor::rows(1));
    let (orch, _) = default_setup("forbid: DROP", &executor);

    orch.submit_query(database_request("DROP TABLE t")).await.unwrap();
    let blocked = orch.tracked_request(QueryKind::Database).unwrap();

    orch.submit_query(database_request("SELECT * FROM t")).await.unwrap();
    let replaced = orch.tracked_request(QueryKind::Database).unwrap();
    assert_ne!(blocked.id, replaced.id);
    assert_eq!(orch.state(QueryKind::Database), RequestState::Succeeded);

    orch.reset(QueryKind::Database).unwrap();
    assert_eq!(orch.state(QueryKind::Database), RequestState::Idle);
    orch.reset(QueryKind::Database).unwrap();
}

#[tokio::test]
async fn history_keeps_latest_hundred() {
    let executor = Arc::new(ScriptedExecutor::rows(1));
    let (orch, _) = default_setup("", &executor);

    for i in 0..150 {
        orch.submit_query(database_request(&format!("SELECT {i} FROM t")))
            .await
            .unwrap();
    }

    let history = orch.get_history(QueryKind::Database, None).to_vec();
    assert_eq!(history.len(), 100);
    assert_eq!(history[0].raw_query, "SELECT 149 FROM t");
    assert_eq!(history[99].raw_query, "SELECT 50 FROM t");

    orch.clear_history(Some(QueryKind::Database));
    assert_eq!(orch.get_history(QueryKind::Database, None).count(), 0);
}

#[tokio::test]
async fn history_filters_and_replay() {
    let executor = Arc::new(ScriptedExecutor::rows(2));
    let (orch, _) = default_setup("the payroll table is restricted", &executor);

    orch.submit_query(database_request("SELECT * FROM payroll")).await.unwrap();
    orch.submit_query(database_request("SELECT * FROM orders LIMIT 2")).await.unwrap();

    let errors = orch.get_history(
        QueryKind::Database,
        Some(HistoryFilter::new().with_status(QueryStatus::Error)),
    );
    assert_eq!(errors.count(), 1);

    let orders = orch.get_history(
        QueryKind::Database,
        Some(HistoryFilter::new().with_search("ORDERS")),
    );
    let entry = orders.iter().next().unwrap().clone();
    assert_eq!(entry.target.id(), TEST_DATABASE);

    orch.submit_query(entry.replay()).await.unwrap();
    assert_eq!(orders.count(), 1);
    assert_eq!(orch.get_history(QueryKind::Database, None).count(), 3);
    assert_eq!(orch.get_history(QueryKind::File, None).count(), 0);
}

#[tokio::test]
async fn saved_queries_round_trip_through_orchestrator() {
    let executor = Arc::new(ScriptedExecutor::rows(4));
    let (orch, _) = default_setup("", &executor);

    let saved = orch
        .save_query(
            NewSavedQuery::new("Top orders", "SELECT * FROM orders LIMIT 4", QueryKind::Database)
                .with_tags(["sales"])
                .with_owner(TEST_USER),
        )
        .unwrap();

    let before = orch.list_saved_queries(None).len();
    orch.delete_saved_query(&SavedQueryId::from("unknown-id"));
    assert_eq!(orch.list_saved_queries(None).len(), before);

    let updated = orch
        .update_saved_query(&saved.id, SavedQueryPatch::new().with_name("Top four orders"))
        .unwrap();
    assert_eq!(updated.name, "Top four orders");

    let listed = orch.list_saved_queries(Some(&SavedQueryFilter::new().with_tag("sales")));
    assert_eq!(listed.len(), 1);

    let outcome = orch
        .submit_query(updated.to_request(TEST_USER, TEST_DATABASE))
        .await
        .unwrap();
    assert_eq!(outcome.result().unwrap().metadata.row_count, Some(4));

    orch.delete_saved_query(&saved.id);
    assert!(orch.list_saved_queries(None).is_empty());
}

#[tokio::test]
async fn config_file_drives_timeout() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "execution_timeout_ms = 30\nhistory_capacity = 2").unwrap();
    let config = OrchestratorConfig::load(file.path()).unwrap();

    let executor = Arc::new(ScriptedExecutor::rows(1).with_delay(Duration::from_millis(200)));
    let (orch, _) = setup_orchestrator("", Arc::clone(&executor), config);

    let outcome = orch.submit_query(database_request("SELECT 1 FROM t")).await.unwrap();
    assert!(!outcome.result().unwrap().is_success());
    assert_eq!(orch.session().history().capacity(), 2);
}
