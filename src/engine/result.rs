//! Execution outcomes: per-node attempt results and the final summary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Error,
    Skipped,
    Timeout,
}

/// Outcome of one attempt at one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    pub duration_ms: u64,
    pub executed_at: i64,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NodeExecutionResult {
    pub fn skipped(node_id: &str, executed_at: i64, reason: Option<&str>) -> Self {
        NodeExecutionResult {
            node_id: node_id.to_string(),
            status: NodeStatus::Skipped,
            output: None,
            error: None,
            duration_ms: 0,
            executed_at,
            attempt: 0,
            reason: reason.map(str::to_string),
        }
    }
}

/// Terminal state of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// Final outcome returned by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    pub node_results: Vec<NodeExecutionResult>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}
