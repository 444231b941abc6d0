//! The execution engine.
//!
//! Walks a compiled graph in topological order, dispatching each node
//! through the registry with per-node retry and timeout, conditional
//! edge suppression, merge rendezvous, session termination and a
//! graph-wide deadline. Cancellation is cooperative: the token is
//! checked between nodes and at every suspension point.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::context::{CancelToken, ExecutionContext, ExecutionOptions};
use super::result::{ExecutionResult, ExecutionState, NodeExecutionResult, NodeStatus};
use crate::clock::{IdGenerator, TimeProvider};
use crate::compiler::{ExecutionGraph, ExecutionNode};
use crate::dispatch::{DispatcherRegistry, HandlerContext, HandlerOutput};
use crate::error::NodeError;
use crate::log::LogStore;
use crate::session::{SessionRecord, SessionStore};

pub struct ExecutionEngine {
    dispatcher: Arc<DispatcherRegistry>,
    sessions: Arc<dyn SessionStore>,
    logs: Arc<dyn LogStore>,
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdGenerator>,
}

/// What one node contributed to the invocation.
enum NodeOutcome {
    /// Handler finished; outputs flow downstream on the chosen handle.
    Produced(HandlerOutput),
    /// Unrecovered failure routed down an `error` branch.
    Recovered(NodeError),
    /// Unrecovered failure with no fallback branch: the invocation fails.
    Fatal(NodeError),
    Cancelled,
}

impl ExecutionEngine {
    pub fn new(
        dispatcher: Arc<DispatcherRegistry>,
        sessions: Arc<dyn SessionStore>,
        logs: Arc<dyn LogStore>,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        ExecutionEngine {
            dispatcher,
            sessions,
            logs,
            time,
            ids,
        }
    }

    /// Run one invocation to completion.
    pub async fn execute(
        &self,
        graph: Arc<ExecutionGraph>,
        trigger_payload: Map<String, Value>,
        session: Option<SessionRecord>,
        options: ExecutionOptions,
        cancel: CancelToken,
    ) -> ExecutionResult {
        let execution_id = self.ids.next_id();
        let started_at = self.time.now_millis();
        let started = Instant::now();
        let invocation_deadline = started + Duration::from_millis(options.max_execution_ms);

        self.logs
            .log_start(
                &execution_id,
                graph.workflow_id,
                graph.workflow_version,
                started_at,
            )
            .await;

        let mut ctx = ExecutionContext {
            execution_id: execution_id.clone(),
            workflow_id: graph.workflow_id,
            workflow_version: graph.workflow_version,
            variables: trigger_payload.clone(),
            trigger_payload,
            session,
            started_at,
        };
        ctx.sync_session_variable();

        if graph.metadata.requires_session && ctx.session.is_none() {
            let error = NodeError::validation(
                "session_required",
                "this workflow requires an interaction session",
            );
            return self
                .finish(ctx, ExecutionState::Failed, Some(error), Vec::new(), started)
                .await;
        }

        let mut results: Vec<NodeExecutionResult> = Vec::new();
        // Outputs of nodes that ran (or recovered through an error
        // branch), keyed by node id. The trigger's payload seeds it.
        let mut produced: HashMap<String, Map<String, Value>> = HashMap::new();
        produced.insert(graph.trigger.clone(), ctx.trigger_payload.clone());
        let mut suppressed_edges: HashSet<String> = HashSet::new();
        let mut final_state = ExecutionState::Completed;
        let mut final_error: Option<NodeError> = None;

        for node_id in &graph.execution_order {
            if node_id == &graph.trigger {
                continue;
            }
            if cancel.is_cancelled() {
                final_state = ExecutionState::Cancelled;
                break;
            }
            if Instant::now() >= invocation_deadline {
                final_state = ExecutionState::Failed;
                final_error = Some(NodeError::transient(
                    "execution_timeout",
                    format!("invocation exceeded {}ms", options.max_execution_ms),
                ));
                break;
            }

            let node = &graph.nodes[node_id];

            if node.disabled {
                let result = NodeExecutionResult::skipped(node_id, self.time.now_millis(), None);
                self.logs.log_node(&execution_id, result.clone()).await;
                results.push(result);
                continue;
            }

            let live_edges: Vec<_> = node
                .incoming
                .iter()
                .filter(|e| !suppressed_edges.contains(&e.id) && produced.contains_key(&e.source))
                .collect();
            if live_edges.is_empty() {
                let result = NodeExecutionResult::skipped(
                    node_id,
                    self.time.now_millis(),
                    Some("unselected_branch"),
                );
                self.logs.log_node(&execution_id, result.clone()).await;
                results.push(result);
                continue;
            }

            // Input assembly: per-edge handle projection, then merge.
            let mut input = Map::new();
            let mut branches = Vec::new();
            for edge in &live_edges {
                let source_output = &produced[&edge.source];
                let projected = match &edge.source_handle {
                    Some(handle) => source_output
                        .get(handle)
                        .map(|v| {
                            let mut m = Map::new();
                            m.insert(handle.clone(), v.clone());
                            m
                        })
                        .unwrap_or_else(|| source_output.clone()),
                    None => source_output.clone(),
                };
                for (k, v) in &projected {
                    input.insert(k.clone(), v.clone());
                }
                branches.push(projected);
            }
            if !node.entry.allows_multiple_inputs {
                branches.clear();
            }

            let scope = crate::template::compose_scope(&ctx.variables, &input);
            let outcome = self
                .run_node(
                    node,
                    &ctx,
                    &scope,
                    &input,
                    &branches,
                    invocation_deadline,
                    &options,
                    &cancel,
                    &mut results,
                )
                .await;

            match outcome {
                NodeOutcome::Produced(HandlerOutput { output, handle }) => {
                    for edge in &node.outgoing {
                        if let Some(source_handle) = &edge.source_handle {
                            if source_handle != &handle {
                                suppressed_edges.insert(edge.id.clone());
                            }
                        }
                    }
                    for (k, v) in &output {
                        ctx.variables.insert(k.clone(), v.clone());
                    }
                    ctx.variables.insert(
                        format!("node_{node_id}"),
                        Value::Object(output.clone()),
                    );
                    produced.insert(node_id.clone(), output);

                    if ctx.session.is_some() {
                        self.refresh_session(&mut ctx).await;
                    }
                    if node.ends_session {
                        debug!(node_id = %node_id, "session ended, stopping execution");
                        break;
                    }
                }
                NodeOutcome::Recovered(error) => {
                    let mut error_output = Map::new();
                    error_output.insert("error".to_string(), serde_json::to_value(&error).unwrap_or(Value::Null));
                    for edge in &node.outgoing {
                        match &edge.source_handle {
                            Some(h) if h == "error" => {}
                            _ => {
                                suppressed_edges.insert(edge.id.clone());
                            }
                        }
                    }
                    ctx.variables.insert(
                        format!("node_{node_id}"),
                        Value::Object(error_output.clone()),
                    );
                    produced.insert(node_id.clone(), error_output);
                }
                NodeOutcome::Fatal(error) => {
                    final_state = ExecutionState::Failed;
                    // A node cut off by the graph-wide deadline is an
                    // invocation timeout, not a node failure.
                    final_error = Some(
                        if error.code == "node_timeout" && Instant::now() >= invocation_deadline {
                            NodeError::transient(
                                "execution_timeout",
                                format!("invocation exceeded {}ms", options.max_execution_ms),
                            )
                        } else {
                            error
                        },
                    );
                    break;
                }
                NodeOutcome::Cancelled => {
                    final_state = ExecutionState::Cancelled;
                    break;
                }
            }
        }

        if cancel.is_cancelled() && final_state == ExecutionState::Completed {
            final_state = ExecutionState::Cancelled;
        }
        self.finish(ctx, final_state, final_error, results, started).await
    }

    /// Execute one node with its retry policy. Every attempt is recorded
    /// and logged.
    #[allow(clippy::too_many_arguments)]
    async fn run_node(
        &self,
        node: &ExecutionNode,
        ctx: &ExecutionContext,
        scope: &Map<String, Value>,
        input: &Map<String, Value>,
        branches: &[Map<String, Value>],
        invocation_deadline: Instant,
        options: &ExecutionOptions,
        cancel: &CancelToken,
        results: &mut Vec<NodeExecutionResult>,
    ) -> NodeOutcome {
        let Some(handler) = self.dispatcher.get(&node.node_type) else {
            let error = NodeError::permanent(
                "unknown_node_type",
                format!("no handler for node type {}", node.node_type),
            );
            let result = self.attempt_result(node, Err(&error), 0, 0);
            self.logs.log_node(&ctx.execution_id, result.clone()).await;
            results.push(result);
            return NodeOutcome::Fatal(error);
        };

        let max_attempts = if options.enable_retries {
            node.retry.as_ref().map(|p| p.max_attempts.max(1)).unwrap_or(1)
        } else {
            1
        };

        let mut attempt = 0u32;
        loop {
            let node_deadline = match node.timeout_ms {
                Some(ms) => invocation_deadline.min(Instant::now() + Duration::from_millis(ms)),
                None => invocation_deadline,
            };
            let handler_ctx = HandlerContext {
                execution_id: &ctx.execution_id,
                node,
                scope,
                input,
                branches,
                session: ctx.session.as_ref(),
                deadline: node_deadline,
                cancel,
            };

            let attempt_started = Instant::now();
            let budget = node_deadline.saturating_duration_since(attempt_started);
            let execution = tokio::time::timeout(budget, handler.execute(handler_ctx)).await;
            let outcome = match execution {
                Ok(result) => result,
                Err(_) => Err(NodeError::timeout(format!(
                    "node {} exceeded its deadline",
                    node.id
                ))),
            };
            let duration_ms = attempt_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(output) => {
                    let result = self.attempt_result(node, Ok(&output), attempt, duration_ms);
                    self.logs.log_node(&ctx.execution_id, result.clone()).await;
                    results.push(result);
                    return NodeOutcome::Produced(output);
                }
                Err(error) => {
                    let result = self.attempt_result(node, Err(&error), attempt, duration_ms);
                    self.logs.log_node(&ctx.execution_id, result.clone()).await;
                    results.push(result);

                    if cancel.is_cancelled() {
                        return NodeOutcome::Cancelled;
                    }

                    let retryable = node
                        .retry
                        .as_ref()
                        .map(|p| p.allows_retry_of(&error))
                        .unwrap_or(false);
                    if attempt + 1 < max_attempts && retryable {
                        attempt += 1;
                        let backoff = node
                            .retry
                            .as_ref()
                            .map(|p| p.delay_ms(attempt))
                            .unwrap_or(0);
                        debug!(
                            node_id = %node.id,
                            attempt,
                            backoff_ms = backoff,
                            code = %error.code,
                            "retrying node after backoff"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                            _ = cancel.cancelled() => return NodeOutcome::Cancelled,
                        }
                        continue;
                    }

                    let has_error_branch = node
                        .outgoing
                        .iter()
                        .any(|e| e.source_handle.as_deref() == Some("error"));
                    if has_error_branch {
                        warn!(
                            node_id = %node.id,
                            code = %error.code,
                            "node failed, routing down its error branch"
                        );
                        return NodeOutcome::Recovered(error);
                    }
                    return NodeOutcome::Fatal(error);
                }
            }
        }
    }

    fn attempt_result(
        &self,
        node: &ExecutionNode,
        outcome: Result<&HandlerOutput, &NodeError>,
        attempt: u32,
        duration_ms: u64,
    ) -> NodeExecutionResult {
        match outcome {
            Ok(output) => NodeExecutionResult {
                node_id: node.id.clone(),
                status: NodeStatus::Success,
                output: Some(output.output.clone()),
                error: None,
                duration_ms,
                executed_at: self.time.now_millis(),
                attempt,
                reason: None,
            },
            Err(error) => NodeExecutionResult {
                node_id: node.id.clone(),
                status: if error.code == "node_timeout" {
                    NodeStatus::Timeout
                } else {
                    NodeStatus::Error
                },
                output: None,
                error: Some(error.clone()),
                duration_ms,
                executed_at: self.time.now_millis(),
                attempt,
                reason: None,
            },
        }
    }

    async fn refresh_session(&self, ctx: &mut ExecutionContext) {
        let Some(session_id) = ctx.session.as_ref().map(|s| s.session_id.clone()) else {
            return;
        };
        if let Some(fresh) = self.sessions.get(&session_id).await {
            ctx.session = Some(fresh);
            ctx.sync_session_variable();
        }
    }

    async fn finish(
        &self,
        ctx: ExecutionContext,
        state: ExecutionState,
        error: Option<NodeError>,
        results: Vec<NodeExecutionResult>,
        started: Instant,
    ) -> ExecutionResult {
        let output = if state == ExecutionState::Completed {
            Some(ctx.variables.clone())
        } else {
            None
        };
        self.logs
            .log_end(
                &ctx.execution_id,
                state,
                self.time.now_millis(),
                output.clone(),
                error.clone(),
            )
            .await;
        ExecutionResult {
            execution_id: ctx.execution_id,
            status: state,
            output,
            error,
            node_results: results,
            duration_ms: started.elapsed().as_millis() as u64,
            session_id: ctx.session.map(|s| s.session_id),
        }
    }
}
