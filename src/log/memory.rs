//! In-memory log store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ExecutionLog, LogQuery, LogStore};
use crate::engine::result::{ExecutionState, NodeExecutionResult};
use crate::error::NodeError;

const DEFAULT_QUERY_LIMIT: usize = 100;
const MAX_QUERY_LIMIT: usize = 1_000;

#[derive(Default)]
pub struct InMemoryLogStore {
    logs: RwLock<HashMap<String, ExecutionLog>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn log_start(
        &self,
        execution_id: &str,
        workflow_id: Uuid,
        workflow_version: u32,
        started_at: i64,
    ) {
        let mut logs = self.logs.write();
        logs.entry(execution_id.to_string()).or_insert(ExecutionLog {
            execution_id: execution_id.to_string(),
            workflow_id,
            workflow_version,
            state: ExecutionState::Running,
            started_at,
            completed_at: None,
            node_results: Vec::new(),
            output: None,
            error: None,
        });
    }

    async fn log_node(&self, execution_id: &str, result: NodeExecutionResult) {
        let mut logs = self.logs.write();
        if let Some(log) = logs.get_mut(execution_id) {
            log.node_results.push(result);
        }
    }

    async fn log_end(
        &self,
        execution_id: &str,
        state: ExecutionState,
        completed_at: i64,
        output: Option<Map<String, Value>>,
        error: Option<NodeError>,
    ) {
        let mut logs = self.logs.write();
        if let Some(log) = logs.get_mut(execution_id) {
            if log.state == ExecutionState::Running {
                log.state = state;
                log.completed_at = Some(completed_at);
                log.output = output;
                log.error = error;
            }
        }
    }

    async fn get(&self, execution_id: &str) -> Option<ExecutionLog> {
        self.logs.read().get(execution_id).cloned()
    }

    async fn query(&self, query: LogQuery) -> Vec<ExecutionLog> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT);
        let logs = self.logs.read();
        let mut matches: Vec<ExecutionLog> = logs
            .values()
            .filter(|log| {
                query.workflow_id.map(|id| log.workflow_id == id).unwrap_or(true)
                    && query.state.map(|s| log.state == s).unwrap_or(true)
                    && query
                        .started_at_from
                        .map(|from| log.started_at >= from)
                        .unwrap_or(true)
                    && query
                        .started_at_to
                        .map(|to| log.started_at <= to)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matches.truncate(limit);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::NodeStatus;

    fn wf(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn result(node_id: &str) -> NodeExecutionResult {
        NodeExecutionResult {
            node_id: node_id.to_string(),
            status: NodeStatus::Success,
            output: None,
            error: None,
            duration_ms: 1,
            executed_at: 0,
            attempt: 0,
            reason: None,
        }
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let store = InMemoryLogStore::new();
        store.log_start("e1", wf(1), 1, 100).await;
        store.log_node("e1", result("n1")).await;
        store.log_start("e1", wf(1), 1, 999).await;
        let log = store.get("e1").await.unwrap();
        assert_eq!(log.started_at, 100);
        assert_eq!(log.node_results.len(), 1);
    }

    #[tokio::test]
    async fn end_applies_once() {
        let store = InMemoryLogStore::new();
        store.log_start("e1", wf(1), 1, 100).await;
        store
            .log_end("e1", ExecutionState::Completed, 150, None, None)
            .await;
        store
            .log_end("e1", ExecutionState::Failed, 200, None, None)
            .await;
        let log = store.get("e1").await.unwrap();
        assert_eq!(log.state, ExecutionState::Completed);
        assert_eq!(log.completed_at, Some(150));
    }

    #[tokio::test]
    async fn node_append_without_start_is_a_no_op() {
        let store = InMemoryLogStore::new();
        store.log_node("ghost", result("n1")).await;
        assert!(store.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn query_filters_sort_and_limit() {
        let store = InMemoryLogStore::new();
        for i in 0..5i64 {
            let id = format!("e{i}");
            let workflow = if i % 2 == 0 { wf(1) } else { wf(2) };
            store.log_start(&id, workflow, 1, 100 + i).await;
            let state = if i == 4 {
                ExecutionState::Failed
            } else {
                ExecutionState::Completed
            };
            store.log_end(&id, state, 200 + i, None, None).await;
        }

        let completed_of_one = store
            .query(LogQuery {
                workflow_id: Some(wf(1)),
                state: Some(ExecutionState::Completed),
                ..Default::default()
            })
            .await;
        assert_eq!(completed_of_one.len(), 2);
        // Newest first.
        assert!(completed_of_one[0].started_at > completed_of_one[1].started_at);

        let ranged = store
            .query(LogQuery {
                started_at_from: Some(101),
                started_at_to: Some(103),
                ..Default::default()
            })
            .await;
        assert_eq!(ranged.len(), 3);

        let limited = store
            .query(LogQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await;
        assert_eq!(limited.len(), 2);
    }
}
