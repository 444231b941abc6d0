//! Execution log recording and querying across invocations.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use teleflow::engine::{CancelToken, ExecutionOptions, ExecutionState};
use teleflow::log::{LogQuery, LogStore};
use teleflow::provider::{MockTelecomProvider, ProviderError};
use teleflow::runtime::Runtime;
use teleflow::workflow::WorkflowDescription;

fn echo_workflow(id: Uuid) -> WorkflowDescription {
    serde_json::from_value(json!({
        "metadata": {"id": id, "version": 1, "name": "echo"},
        "trigger": "t",
        "nodes": [
            {"id": "t", "type": "sms_received"},
            {"id": "reply", "type": "send_sms",
             "config": {"to": "{{subscriber}}", "message": "ok"}}
        ],
        "edges": [{"id": "e1", "source": "t", "target": "reply"}]
    }))
    .unwrap()
}

fn payload() -> Map<String, Value> {
    json!({"subscriber": "+254700000001", "message": "hi"})
        .as_object()
        .unwrap()
        .clone()
}

async fn run(runtime: &Runtime, desc: &WorkflowDescription) -> ExecutionState {
    runtime
        .execute(
            desc,
            payload(),
            None,
            ExecutionOptions {
                enable_retries: false,
                ..Default::default()
            },
            CancelToken::none(),
        )
        .await
        .unwrap()
        .status
}

// Filters return only the matching invocations, newest first.
#[tokio::test]
async fn query_filters_by_workflow_and_state() {
    let provider = Arc::new(MockTelecomProvider::new());
    let runtime = Runtime::builder().provider(provider.clone()).build();

    let target = Uuid::new_v4();
    let other = Uuid::new_v4();
    let target_wf = echo_workflow(target);
    let other_wf = echo_workflow(other);

    // Two completed runs of the target workflow, one failed run of it,
    // and one completed run of another workflow.
    assert_eq!(run(&runtime, &target_wf).await, ExecutionState::Completed);
    assert_eq!(run(&runtime, &target_wf).await, ExecutionState::Completed);
    provider.fail_next("send_sms", ProviderError::Network("down".into()), 1);
    assert_eq!(run(&runtime, &target_wf).await, ExecutionState::Failed);
    assert_eq!(run(&runtime, &other_wf).await, ExecutionState::Completed);

    let completed = runtime
        .logs
        .query(LogQuery {
            workflow_id: Some(target),
            state: Some(ExecutionState::Completed),
            limit: Some(10),
            ..Default::default()
        })
        .await;
    assert_eq!(completed.len(), 2);
    assert!(completed.iter().all(|log| log.workflow_id == target));
    assert!(completed
        .iter()
        .all(|log| log.state == ExecutionState::Completed));
    assert!(completed[0].started_at >= completed[1].started_at);

    let failed = runtime
        .logs
        .query(LogQuery {
            workflow_id: Some(target),
            state: Some(ExecutionState::Failed),
            ..Default::default()
        })
        .await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error.as_ref().unwrap().code, "network_error");
}

#[tokio::test]
async fn log_records_every_attempt_and_terminal_state() {
    let provider = Arc::new(MockTelecomProvider::new());
    let runtime = Runtime::builder().provider(provider.clone()).build();
    let desc: WorkflowDescription = serde_json::from_value(json!({
        "metadata": {"id": Uuid::new_v4(), "version": 1, "name": "retrying"},
        "trigger": "t",
        "nodes": [
            {"id": "t", "type": "sms_received"},
            {"id": "reply", "type": "send_sms",
             "config": {"to": "x", "message": "y"},
             "retry": {"max_attempts": 2, "initial_delay_ms": 1,
                        "backoff_multiplier": 1.0, "max_delay_ms": 1,
                        "retryable_errors": ["network_error"]}}
        ],
        "edges": [{"id": "e1", "source": "t", "target": "reply"}]
    }))
    .unwrap();

    provider.fail_next("send_sms", ProviderError::Network("down".into()), 1);
    let result = runtime
        .execute(
            &desc,
            payload(),
            None,
            ExecutionOptions::default(),
            CancelToken::none(),
        )
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionState::Completed);

    let log = runtime.logs.get(&result.execution_id).await.unwrap();
    assert_eq!(log.state, ExecutionState::Completed);
    assert!(log.completed_at.is_some());
    // First attempt failed, second succeeded; both are in the log.
    assert_eq!(log.node_results.len(), 2);
    assert_eq!(log.node_results[0].attempt, 0);
    assert_eq!(log.node_results[1].attempt, 1);

    assert!(runtime.logs.get("missing").await.is_none());
}
