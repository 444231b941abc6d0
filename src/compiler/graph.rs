//! The compiled, immutable execution graph.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::catalog::NodeCatalogEntry;
use crate::workflow::RetryPolicy;

/// A directed edge between two compiled nodes.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeRef {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// One node ready for execution: resolved config, effective retry and
/// timeout, and ordered adjacency.
#[derive(Debug)]
pub struct ExecutionNode {
    pub id: String,
    pub node_type: String,
    pub entry: Arc<NodeCatalogEntry>,
    /// Config after schema defaults were applied.
    pub config: Map<String, Value>,
    /// Node override when present, else the catalog default.
    pub retry: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
    pub disabled: bool,
    /// Inbound edges in description order.
    pub incoming: Vec<EdgeRef>,
    /// Outbound edges in description order.
    pub outgoing: Vec<EdgeRef>,
    pub requires_session: bool,
    pub ends_session: bool,
    /// Position in `execution_order`.
    pub ordinal: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphMetadata {
    pub requires_session: bool,
    pub has_session_end: bool,
    /// Edge count of the longest path from the trigger.
    pub max_depth: usize,
    pub has_cycles: bool,
}

/// Compiler output, safe to cache and share across invocations.
#[derive(Debug)]
pub struct ExecutionGraph {
    pub workflow_id: Uuid,
    pub workflow_version: u32,
    pub trigger: String,
    pub nodes: HashMap<String, ExecutionNode>,
    /// Every reachable node exactly once; predecessors precede successors.
    pub execution_order: Vec<String>,
    pub metadata: GraphMetadata,
}

impl ExecutionGraph {
    pub fn node(&self, id: &str) -> Option<&ExecutionNode> {
        self.nodes.get(id)
    }

    pub fn trigger_node(&self) -> &ExecutionNode {
        &self.nodes[&self.trigger]
    }

    /// Serializable summary returned by the compile endpoint.
    pub fn summary(&self) -> Value {
        let nodes: Vec<Value> = self
            .execution_order
            .iter()
            .map(|id| {
                let node = &self.nodes[id];
                serde_json::json!({
                    "id": node.id,
                    "type": node.node_type,
                    "ordinal": node.ordinal,
                    "disabled": node.disabled,
                    "requires_session": node.requires_session,
                    "ends_session": node.ends_session,
                    "timeout_ms": node.timeout_ms,
                    "incoming": node.incoming,
                    "outgoing": node.outgoing,
                })
            })
            .collect();
        serde_json::json!({
            "workflow_id": self.workflow_id,
            "workflow_version": self.workflow_version,
            "trigger": self.trigger,
            "execution_order": self.execution_order,
            "nodes": nodes,
            "metadata": self.metadata,
        })
    }
}
