//! End-to-end scenarios through the runtime: compile + session handling
//! + engine + dispatcher against the recording mock provider.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use teleflow::engine::{cancel_pair, CancelToken, ExecutionOptions, ExecutionState, NodeStatus};
use teleflow::provider::{MockTelecomProvider, ProviderError};
use teleflow::runtime::Runtime;
use teleflow::session::SessionStore;
use teleflow::workflow::WorkflowDescription;

fn workflow(trigger: Value, nodes: Value, edges: Value) -> WorkflowDescription {
    let mut all_nodes = vec![trigger];
    all_nodes.extend(nodes.as_array().cloned().unwrap_or_default());
    let trigger_id = all_nodes[0]["id"].clone();
    serde_json::from_value(json!({
        "metadata": {
            "id": uuid::Uuid::new_v4(),
            "version": 1,
            "name": "scenario"
        },
        "trigger": trigger_id,
        "nodes": all_nodes,
        "edges": edges
    }))
    .expect("scenario workflow deserializes")
}

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().expect("payload is an object").clone()
}

fn mock_runtime() -> (Arc<Runtime>, Arc<MockTelecomProvider>) {
    let provider = Arc::new(MockTelecomProvider::new());
    let runtime = Runtime::builder().provider(provider.clone()).build();
    (runtime, provider)
}

async fn run(
    runtime: &Runtime,
    desc: &WorkflowDescription,
    trigger_payload: Map<String, Value>,
) -> teleflow::engine::ExecutionResult {
    runtime
        .execute(
            desc,
            trigger_payload,
            None,
            ExecutionOptions::default(),
            CancelToken::none(),
        )
        .await
        .expect("execution starts")
}

// The dispatcher receives the rendered to/message for an SMS echo.
#[tokio::test]
async fn sms_echo_renders_templates_into_the_provider_call() {
    let (runtime, provider) = mock_runtime();
    let desc = workflow(
        json!({"id": "t", "type": "sms_received"}),
        json!([{
            "id": "reply",
            "type": "send_sms",
            "config": {"to": "{{subscriber}}", "message": "You said: {{message}}"}
        }]),
        json!([{"id": "e1", "source": "t", "target": "reply"}]),
    );
    let result = run(
        &runtime,
        &desc,
        payload(json!({
            "subscriber": "+254700000001",
            "message": "hello",
            "message_id": "m-1"
        })),
    )
    .await;

    assert_eq!(result.status, ExecutionState::Completed);
    assert_eq!(result.node_results.len(), 1);
    let reply = &result.node_results[0];
    assert_eq!(reply.status, NodeStatus::Success);
    let message_id = reply.output.as_ref().unwrap()["message_id"].as_str().unwrap();
    assert!(!message_id.is_empty());

    let calls = provider.calls_for("send_sms");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["to"], "+254700000001");
    assert_eq!(calls[0].payload["message"], "You said: hello");
}

// A USSD menu only compiles with a session_end, and executing it
// leaves the gateway session inactive.
#[tokio::test]
async fn ussd_menu_requires_session_end_and_ends_the_session() {
    let (runtime, provider) = mock_runtime();

    let without_end = workflow(
        json!({"id": "t", "type": "ussd_session_start"}),
        json!([{
            "id": "menu",
            "type": "send_ussd_response",
            "config": {"message": "Welcome", "expect_input": true}
        }]),
        json!([{"id": "e1", "source": "t", "target": "menu"}]),
    );
    let report = runtime.compile(&without_end).unwrap_err();
    assert!(report
        .errors
        .iter()
        .any(|e| e.code == "ussd_missing_session_end"));

    let with_end = workflow(
        json!({"id": "t", "type": "ussd_session_start"}),
        json!([
            {
                "id": "menu",
                "type": "send_ussd_response",
                "config": {"message": "Welcome", "expect_input": false}
            },
            {"id": "bye", "type": "session_end"}
        ]),
        json!([
            {"id": "e1", "source": "t", "target": "menu"},
            {"id": "e2", "source": "menu", "target": "bye"}
        ]),
    );
    let result = run(
        &runtime,
        &with_end,
        payload(json!({
            "session_id": "s1",
            "subscriber": "+254700000002",
            "service_code": "*123#"
        })),
    )
    .await;

    assert_eq!(result.status, ExecutionState::Completed);
    assert_eq!(result.session_id.as_deref(), Some("s1"));
    assert_eq!(provider.calls_for("send_ussd_response").len(), 1);
    // The record exists but no longer satisfies lookups.
    assert!(runtime.sessions.get("s1").await.is_none());
    assert!(runtime
        .sessions
        .find_active("+254700000002", teleflow::session::Channel::Ussd)
        .await
        .is_none());
}

// Condition routing: only the selected branch executes.
#[tokio::test]
async fn condition_routes_one_branch_and_skips_the_other() {
    fn branching() -> WorkflowDescription {
        workflow(
            json!({"id": "t", "type": "sms_received"}),
            json!([
                {"id": "check", "type": "condition", "config": {"expression": "{{amount}} > 100"}},
                {"id": "big", "type": "send_sms",
                 "config": {"to": "{{subscriber}}", "message": "big"}},
                {"id": "small", "type": "send_sms",
                 "config": {"to": "{{subscriber}}", "message": "small"}}
            ]),
            json!([
                {"id": "e1", "source": "t", "target": "check"},
                {"id": "e2", "source": "check", "target": "big", "source_handle": "true"},
                {"id": "e3", "source": "check", "target": "small", "source_handle": "false"}
            ]),
        )
    }

    let (runtime, provider) = mock_runtime();
    let result = run(
        &runtime,
        &branching(),
        payload(json!({"subscriber": "+254700", "amount": 50})),
    )
    .await;
    assert_eq!(result.status, ExecutionState::Completed);
    let status_of = |id: &str| {
        result
            .node_results
            .iter()
            .find(|r| r.node_id == id)
            .map(|r| r.status)
            .unwrap()
    };
    assert_eq!(status_of("check"), NodeStatus::Success);
    assert_eq!(status_of("small"), NodeStatus::Success);
    assert_eq!(status_of("big"), NodeStatus::Skipped);
    let calls = provider.calls_for("send_sms");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["message"], "small");

    let (runtime, provider) = mock_runtime();
    let result = run(
        &runtime,
        &branching(),
        payload(json!({"subscriber": "+254700", "amount": 150})),
    )
    .await;
    assert_eq!(result.status, ExecutionState::Completed);
    let calls = provider.calls_for("send_sms");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["message"], "big");
}

// Retry exhaustion: attempts 0..2 recorded, back-off observed,
// final error is the provider's.
#[tokio::test]
async fn retry_exhausts_with_exponential_backoff() {
    let (runtime, provider) = mock_runtime();
    provider.fail_next("send_sms", ProviderError::Network("connection reset".into()), 10);

    let desc = workflow(
        json!({"id": "t", "type": "sms_received"}),
        json!([{
            "id": "flaky",
            "type": "send_sms",
            "config": {"to": "x", "message": "y"},
            "retry": {
                "max_attempts": 3,
                "initial_delay_ms": 10,
                "backoff_multiplier": 2.0,
                "max_delay_ms": 1000,
                "retryable_errors": ["network_error"]
            }
        }]),
        json!([{"id": "e1", "source": "t", "target": "flaky"}]),
    );

    let started = Instant::now();
    let result = run(&runtime, &desc, payload(json!({"subscriber": "+254"}))).await;
    let elapsed = started.elapsed();

    assert_eq!(result.status, ExecutionState::Failed);
    assert_eq!(result.error.as_ref().unwrap().code, "network_error");
    let attempts: Vec<u32> = result.node_results.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    assert!(result
        .node_results
        .iter()
        .all(|r| r.status == NodeStatus::Error));
    // Back-off slept ~10ms then ~20ms.
    assert!(elapsed.as_millis() >= 30, "elapsed {elapsed:?}");
}

// Session write/read round-trip through the store.
#[tokio::test]
async fn session_write_read_roundtrip_renders_into_ussd_reply() {
    let (runtime, provider) = mock_runtime();
    let desc = workflow(
        json!({"id": "t", "type": "ussd_session_start"}),
        json!([
            {"id": "w", "type": "session_write", "config": {"data": {"step": "1"}}},
            {"id": "r", "type": "session_read", "config": {"keys": ["step"]}},
            {"id": "say", "type": "send_ussd_response",
             "config": {"message": "step={{session.data.step}}"}},
            {"id": "bye", "type": "session_end"}
        ]),
        json!([
            {"id": "e1", "source": "t", "target": "w"},
            {"id": "e2", "source": "w", "target": "r"},
            {"id": "e3", "source": "r", "target": "say"},
            {"id": "e4", "source": "say", "target": "bye"}
        ]),
    );
    let result = run(
        &runtime,
        &desc,
        payload(json!({"session_id": "s9", "subscriber": "+254700000009"})),
    )
    .await;

    assert_eq!(result.status, ExecutionState::Completed);
    let calls = provider.calls_for("send_ussd_response");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["message"], "step=1");
    assert!(runtime.sessions.get("s9").await.is_none());
}

// A diamond: the join node sees both predecessors. outputs.
#[tokio::test]
async fn join_node_receives_outputs_of_all_predecessors() {
    use async_trait::async_trait;
    use teleflow::catalog::{NodeCatalog, NodeCatalogEntry, NodeCategory};
    use teleflow::clock::{SystemTimeProvider, UuidGenerator};
    use teleflow::dispatch::{ActionHandler, DispatcherRegistry, HandlerContext, HandlerOutput};
    use teleflow::session::InMemorySessionStore;

    struct Stamp;
    #[async_trait]
    impl ActionHandler for Stamp {
        async fn execute(
            &self,
            _ctx: HandlerContext<'_>,
        ) -> teleflow::error::NodeResult<HandlerOutput> {
            let mut out = Map::new();
            out.insert("b_mark".to_string(), json!(true));
            Ok(HandlerOutput::success(out))
        }
    }

    let mut catalog = NodeCatalog::with_builtins();
    let mut entry = NodeCatalogEntry::new("stamp", NodeCategory::Action, "Stamp");
    entry.output_handles = vec![teleflow::catalog::HandleSpec::output("success")];
    catalog.register(entry).unwrap();

    let time = Arc::new(SystemTimeProvider);
    let ids = Arc::new(UuidGenerator);
    let provider = Arc::new(MockTelecomProvider::new());
    let sessions = Arc::new(InMemorySessionStore::new(time.clone(), ids.clone()));
    let mut dispatcher =
        DispatcherRegistry::with_builtins(provider.clone(), sessions.clone(), time.clone());
    dispatcher.register("stamp", Arc::new(Stamp)).unwrap();

    let runtime = Runtime::builder()
        .catalog(catalog)
        .dispatcher(dispatcher)
        .sessions(sessions)
        .provider(provider)
        .build();

    // a(trigger) -> b, a -> c, b -> c
    let desc = workflow(
        json!({"id": "a", "type": "sms_received"}),
        json!([
            {"id": "b", "type": "stamp"},
            {"id": "c", "type": "merge", "config": {"strategy": "merge"}}
        ]),
        json!([
            {"id": "e1", "source": "a", "target": "b"},
            {"id": "e2", "source": "a", "target": "c"},
            {"id": "e3", "source": "b", "target": "c"}
        ]),
    );

    let order = &runtime.compile(&desc).unwrap().graph.execution_order;
    let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
    assert!(pos("a") < pos("b") && pos("b") < pos("c"));

    let result = run(&runtime, &desc, payload(json!({"subscriber": "+254", "x": 1}))).await;
    assert_eq!(result.status, ExecutionState::Completed);
    let join = result
        .node_results
        .iter()
        .find(|r| r.node_id == "c")
        .unwrap();
    let output = join.output.as_ref().unwrap();
    // Keys from the trigger payload (edge a->c) and from b (edge b->c).
    assert_eq!(output["x"], json!(1));
    assert_eq!(output["b_mark"], json!(true));
}

// Boundary: a trigger-only workflow completes with the payload as output.
#[tokio::test]
async fn trigger_only_workflow_completes_with_payload_output() {
    let (runtime, _) = mock_runtime();
    let desc = workflow(json!({"id": "t", "type": "sms_received"}), json!([]), json!([]));
    let result = run(
        &runtime,
        &desc,
        payload(json!({"subscriber": "+254", "message": "ping"})),
    )
    .await;
    assert_eq!(result.status, ExecutionState::Completed);
    assert!(result.node_results.is_empty());
    let output = result.output.unwrap();
    assert_eq!(output["subscriber"], json!("+254"));
    assert_eq!(output["message"], json!("ping"));
}

// Boundary: disabled nodes are skipped with zero duration.
#[tokio::test]
async fn disabled_node_is_skipped() {
    let (runtime, provider) = mock_runtime();
    let desc = workflow(
        json!({"id": "t", "type": "sms_received"}),
        json!([{
            "id": "off",
            "type": "send_sms",
            "config": {"to": "x", "message": "y"},
            "disabled": true
        }]),
        json!([{"id": "e1", "source": "t", "target": "off"}]),
    );
    let result = run(&runtime, &desc, payload(json!({"subscriber": "+254"}))).await;
    assert_eq!(result.status, ExecutionState::Completed);
    assert_eq!(result.node_results[0].status, NodeStatus::Skipped);
    assert_eq!(result.node_results[0].duration_ms, 0);
    assert!(provider.calls_for("send_sms").is_empty());
}

// Boundary: the graph-wide deadline fails the invocation with
// execution_timeout and keeps the partial results.
#[tokio::test]
async fn invocation_deadline_yields_execution_timeout() {
    let (runtime, _) = mock_runtime();
    let desc = workflow(
        json!({"id": "t", "type": "sms_received"}),
        json!([{"id": "wait", "type": "delay", "config": {"duration_ms": 5000}}]),
        json!([{"id": "e1", "source": "t", "target": "wait"}]),
    );
    let result = runtime
        .execute(
            &desc,
            payload(json!({"subscriber": "+254"})),
            None,
            ExecutionOptions {
                max_execution_ms: 50,
                ..Default::default()
            },
            CancelToken::none(),
        )
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionState::Failed);
    assert_eq!(result.error.as_ref().unwrap().code, "execution_timeout");
    assert!(!result.node_results.is_empty());
}

// Cancellation fires between nodes and inside suspension points.
#[tokio::test]
async fn cancellation_interrupts_a_delay() {
    let (runtime, _) = mock_runtime();
    let desc = workflow(
        json!({"id": "t", "type": "sms_received"}),
        json!([{"id": "wait", "type": "delay", "config": {"duration_ms": 10_000}}]),
        json!([{"id": "e1", "source": "t", "target": "wait"}]),
    );
    let (handle, token) = cancel_pair();
    let runtime_clone = runtime.clone();
    let desc_clone = desc.clone();
    let task = tokio::spawn(async move {
        runtime_clone
            .execute(
                &desc_clone,
                payload(json!({"subscriber": "+254"})),
                None,
                ExecutionOptions::default(),
                token,
            )
            .await
            .unwrap()
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.cancel();
    let result = task.await.unwrap();
    assert_eq!(result.status, ExecutionState::Cancelled);
}

// An error branch recovers a failing node instead of failing the run.
#[tokio::test]
async fn error_branch_recovers_a_failed_action() {
    let (runtime, provider) = mock_runtime();
    provider.fail_next(
        "send_sms",
        ProviderError::Api {
            status: 400,
            message: "bad number".into(),
        },
        1,
    );
    let desc = workflow(
        json!({"id": "t", "type": "sms_received"}),
        json!([
            {"id": "try_sms", "type": "send_sms", "config": {"to": "bogus", "message": "m"}},
            {"id": "gate", "type": "retry", "config": {}},
            {"id": "fallback", "type": "send_sms",
             "config": {"to": "{{subscriber}}", "message": "fallback"}}
        ]),
        json!([
            {"id": "e1", "source": "t", "target": "try_sms"},
            {"id": "e2", "source": "try_sms", "target": "gate", "source_handle": "error"},
            {"id": "e3", "source": "gate", "target": "fallback", "source_handle": "max_retries"}
        ]),
    );
    let result = run(&runtime, &desc, payload(json!({"subscriber": "+254"}))).await;
    assert_eq!(result.status, ExecutionState::Completed);
    let calls = provider.calls_for("send_sms");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["message"], "fallback");
}

// Voice actions demand a voice-channel session.
#[tokio::test]
async fn voice_nodes_reject_non_voice_sessions() {
    let (runtime, _) = mock_runtime();
    let desc = workflow(
        json!({"id": "t", "type": "ussd_session_start"}),
        json!([
            {"id": "ivr", "type": "play_ivr", "config": {"text": "hello"}},
            {"id": "bye", "type": "session_end"}
        ]),
        json!([
            {"id": "e1", "source": "t", "target": "ivr"},
            {"id": "e2", "source": "ivr", "target": "bye"}
        ]),
    );
    let result = run(
        &runtime,
        &desc,
        payload(json!({"session_id": "u1", "subscriber": "+254"})),
    )
    .await;
    assert_eq!(result.status, ExecutionState::Failed);
    assert_eq!(
        result.error.as_ref().unwrap().code,
        "voice_session_required"
    );
}

// Switch routes by rendered value, falling back to default.
#[tokio::test]
async fn switch_routes_to_matching_case() {
    let (runtime, provider) = mock_runtime();
    let desc = workflow(
        json!({"id": "t", "type": "payment_callback"}),
        json!([
            {"id": "route", "type": "switch", "config": {
                "value": "{{status}}",
                "cases": [
                    {"value": "Success", "label": "paid"},
                    {"value": "Failed"}
                ]
            }},
            {"id": "thanks", "type": "send_sms",
             "config": {"to": "{{subscriber}}", "message": "thanks"}},
            {"id": "sorry", "type": "send_sms",
             "config": {"to": "{{subscriber}}", "message": "sorry"}},
            {"id": "shrug", "type": "send_sms",
             "config": {"to": "{{subscriber}}", "message": "unknown"}}
        ]),
        json!([
            {"id": "e1", "source": "t", "target": "route"},
            {"id": "e2", "source": "route", "target": "thanks", "source_handle": "paid"},
            {"id": "e3", "source": "route", "target": "sorry", "source_handle": "Failed"},
            {"id": "e4", "source": "route", "target": "shrug", "source_handle": "default"}
        ]),
    );
    let result = run(
        &runtime,
        &desc,
        payload(json!({
            "transaction_id": "txn-1",
            "status": "Success",
            "amount": 10,
            "currency": "KES",
            "subscriber": "+254"
        })),
    )
    .await;
    assert_eq!(result.status, ExecutionState::Completed);
    let calls = provider.calls_for("send_sms");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["message"], "thanks");
}
