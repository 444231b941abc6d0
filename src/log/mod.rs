//! Append-only execution log.

pub mod memory;

pub use memory::InMemoryLogStore;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::result::{ExecutionState, NodeExecutionResult};
use crate::error::NodeError;

/// Record of one invocation, from `log_start` to `log_end`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLog {
    pub execution_id: String,
    pub workflow_id: Uuid,
    pub workflow_version: u32,
    pub state: ExecutionState,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Every attempt of every node, in execution order.
    pub node_results: Vec<NodeExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
}

/// Filters for [`LogStore::query`]. Timestamps are inclusive bounds on
/// `started_at`.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub workflow_id: Option<Uuid>,
    pub state: Option<ExecutionState>,
    pub started_at_from: Option<i64>,
    pub started_at_to: Option<i64>,
    pub limit: Option<usize>,
}

/// Append-only store of execution logs. Every operation is total and
/// idempotent on `execution_id`.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn log_start(
        &self,
        execution_id: &str,
        workflow_id: Uuid,
        workflow_version: u32,
        started_at: i64,
    );

    async fn log_node(&self, execution_id: &str, result: NodeExecutionResult);

    async fn log_end(
        &self,
        execution_id: &str,
        state: ExecutionState,
        completed_at: i64,
        output: Option<Map<String, Value>>,
        error: Option<NodeError>,
    );

    async fn get(&self, execution_id: &str) -> Option<ExecutionLog>;

    /// Matching logs sorted by `started_at` descending.
    async fn query(&self, query: LogQuery) -> Vec<ExecutionLog>;
}
