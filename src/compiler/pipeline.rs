//! Compilation pipeline: structural validation, type and config checks,
//! graph construction, topological ordering, semantic rules, metadata.
//!
//! The pipeline aborts at the first stage that produced errors; warnings
//! accumulate across every stage that ran.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use super::graph::{EdgeRef, ExecutionGraph, ExecutionNode, GraphMetadata};
use crate::catalog::NodeCatalog;
use crate::workflow::{WorkflowDescription, TRIGGER_TYPES};

/// One compiler finding with a stable code.
#[derive(Debug, Clone, Serialize)]
pub struct CompileIssue {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

impl CompileIssue {
    fn new(code: &str, message: impl Into<String>) -> Self {
        CompileIssue {
            code: code.to_string(),
            message: message.into(),
            node_id: None,
            edge_id: None,
        }
    }

    fn on_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    fn on_edge(mut self, edge_id: &str) -> Self {
        self.edge_id = Some(edge_id.to_string());
        self
    }
}

/// Errors and warnings from a failed compilation.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CompileReport {
    pub errors: Vec<CompileIssue>,
    pub warnings: Vec<CompileIssue>,
}

/// Successful compilation: the shared graph plus accumulated warnings.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub graph: Arc<ExecutionGraph>,
    pub warnings: Vec<CompileIssue>,
}

/// Pure function over the description and a catalog snapshot.
pub struct WorkflowCompiler {
    catalog: Arc<NodeCatalog>,
}

impl WorkflowCompiler {
    pub fn new(catalog: Arc<NodeCatalog>) -> Self {
        WorkflowCompiler { catalog }
    }

    pub fn catalog(&self) -> &Arc<NodeCatalog> {
        &self.catalog
    }

    pub fn compile(&self, desc: &WorkflowDescription) -> Result<Compiled, CompileReport> {
        let mut warnings = Vec::new();

        // Stage 1: structural validation.
        let errors = self.check_structure(desc);
        if !errors.is_empty() {
            return Err(CompileReport { errors, warnings });
        }

        // Stage 2: every node type exists in the catalog.
        let errors = self.check_types(desc);
        if !errors.is_empty() {
            return Err(CompileReport { errors, warnings });
        }

        // Stage 3: config validation, collecting resolved configs.
        let (resolved_configs, errors) = self.check_configs(desc);
        if !errors.is_empty() {
            return Err(CompileReport { errors, warnings });
        }

        // Stage 4: adjacency construction in description order.
        let (incoming, outgoing) = build_adjacency(desc);

        // Stage 5: trigger-rooted depth-first ordering.
        let order = match depth_first_order(desc, &outgoing) {
            Ok(order) => order,
            Err(errors) => return Err(CompileReport { errors, warnings }),
        };

        // Stage 6: semantic rules.
        let errors = self.check_semantics(desc, &incoming);
        if !errors.is_empty() {
            return Err(CompileReport { errors, warnings });
        }

        // Stage 7: metadata and non-fatal findings.
        let graph = self.assemble(desc, resolved_configs, incoming, outgoing, order);
        for node_id in &graph.execution_order {
            let node = &graph.nodes[node_id];
            if node.outgoing.is_empty() && !node.ends_session && node_id != &graph.trigger {
                warnings.push(
                    CompileIssue::new(
                        "dead_end_node",
                        format!("node {node_id} has no outgoing edges"),
                    )
                    .on_node(node_id),
                );
            }
        }

        Ok(Compiled {
            graph: Arc::new(graph),
            warnings,
        })
    }

    fn check_structure(&self, desc: &WorkflowDescription) -> Vec<CompileIssue> {
        let mut errors = Vec::new();

        if desc.metadata.version == 0 {
            errors.push(CompileIssue::new(
                "schema_validation_error",
                "workflow version must be a positive integer",
            ));
        }
        if desc.metadata.name.trim().is_empty() {
            errors.push(CompileIssue::new(
                "schema_validation_error",
                "workflow name must not be empty",
            ));
        }

        let mut seen = HashSet::new();
        for node in &desc.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(
                    CompileIssue::new("duplicate_node_id", format!("duplicate node id: {}", node.id))
                        .on_node(&node.id),
                );
            }
        }

        match desc.trigger_node() {
            None => errors.push(CompileIssue::new(
                "schema_validation_error",
                format!("trigger node {} is not declared in nodes", desc.trigger),
            )),
            Some(trigger) => {
                if !TRIGGER_TYPES.contains(&trigger.node_type.as_str()) {
                    errors.push(
                        CompileIssue::new(
                            "schema_validation_error",
                            format!("node type {} cannot be used as a trigger", trigger.node_type),
                        )
                        .on_node(&trigger.id),
                    );
                }
            }
        }

        let ids: HashSet<&str> = desc.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &desc.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    errors.push(
                        CompileIssue::new(
                            "schema_validation_error",
                            format!("edge {} references unknown node {}", edge.id, endpoint),
                        )
                        .on_edge(&edge.id),
                    );
                }
            }
        }

        errors
    }

    fn check_types(&self, desc: &WorkflowDescription) -> Vec<CompileIssue> {
        desc.nodes
            .iter()
            .filter(|n| self.catalog.lookup(&n.node_type).is_none())
            .map(|n| {
                CompileIssue::new(
                    "unknown_node_type",
                    format!("unknown node type: {}", n.node_type),
                )
                .on_node(&n.id)
            })
            .collect()
    }

    fn check_configs(
        &self,
        desc: &WorkflowDescription,
    ) -> (HashMap<String, serde_json::Map<String, serde_json::Value>>, Vec<CompileIssue>) {
        let mut resolved = HashMap::new();
        let mut errors = Vec::new();
        for node in &desc.nodes {
            match self.catalog.validate_config(&node.node_type, &node.config) {
                Ok(config) => {
                    resolved.insert(node.id.clone(), config);
                }
                Err(issues) => {
                    for issue in issues {
                        errors.push(
                            CompileIssue::new(
                                "node_config_validation_error",
                                format!("{}: {}", issue.path, issue.message),
                            )
                            .on_node(&node.id),
                        );
                    }
                }
            }
        }
        (resolved, errors)
    }

    fn check_semantics(
        &self,
        desc: &WorkflowDescription,
        incoming: &HashMap<String, Vec<EdgeRef>>,
    ) -> Vec<CompileIssue> {
        let mut errors = Vec::new();

        if incoming.get(&desc.trigger).map(|e| !e.is_empty()).unwrap_or(false) {
            errors.push(
                CompileIssue::new(
                    "trigger_has_incoming_edges",
                    "the trigger node cannot have incoming edges",
                )
                .on_node(&desc.trigger),
            );
        }

        let type_of: HashMap<&str, &str> = desc
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.node_type.as_str()))
            .collect();
        for edge in &desc.edges {
            let source_type = type_of[edge.source.as_str()];
            let target_type = type_of[edge.target.as_str()];
            let source_entry = self.catalog.lookup(source_type).expect("type-checked");
            let target_entry = self.catalog.lookup(target_type).expect("type-checked");
            if let Some(allowed) = &source_entry.allowed_outgoing_types {
                if !allowed.iter().any(|t| t == target_type) {
                    errors.push(
                        CompileIssue::new(
                            "invalid_node_connection",
                            format!("{source_type} may not connect to {target_type}"),
                        )
                        .on_edge(&edge.id),
                    );
                }
            }
            if let Some(allowed) = &target_entry.allowed_incoming_types {
                if !allowed.iter().any(|t| t == source_type) {
                    errors.push(
                        CompileIssue::new(
                            "invalid_node_connection",
                            format!("{target_type} may not be fed from {source_type}"),
                        )
                        .on_edge(&edge.id),
                    );
                }
            }
        }

        let trigger_type = desc.trigger_node().map(|n| n.node_type.as_str());
        if trigger_type == Some("ussd_session_start")
            && !desc.nodes.iter().any(|n| n.node_type == "session_end")
        {
            errors.push(CompileIssue::new(
                "ussd_missing_session_end",
                "a USSD workflow must contain a session_end node",
            ));
        }

        errors
    }

    fn assemble(
        &self,
        desc: &WorkflowDescription,
        mut resolved_configs: HashMap<String, serde_json::Map<String, serde_json::Value>>,
        mut incoming: HashMap<String, Vec<EdgeRef>>,
        mut outgoing: HashMap<String, Vec<EdgeRef>>,
        order: Vec<String>,
    ) -> ExecutionGraph {
        let mut nodes = HashMap::new();
        let reachable: HashSet<&String> = order.iter().collect();
        let mut requires_session = false;
        let mut has_session_end = false;

        for (ordinal, node_id) in order.iter().enumerate() {
            let spec = desc.node(node_id).expect("ordered ids come from the description");
            let entry = self.catalog.lookup(&spec.node_type).expect("type-checked");
            requires_session |= entry.requires_session;
            has_session_end |= entry.ends_session;
            nodes.insert(
                node_id.clone(),
                ExecutionNode {
                    id: node_id.clone(),
                    node_type: spec.node_type.clone(),
                    config: resolved_configs.remove(node_id).unwrap_or_default(),
                    retry: spec.retry.clone().or_else(|| entry.default_retry_policy.clone()),
                    timeout_ms: spec.timeout_ms.or(entry.default_timeout_ms),
                    disabled: spec.disabled,
                    incoming: incoming.remove(node_id).unwrap_or_default(),
                    outgoing: outgoing.remove(node_id).unwrap_or_default(),
                    requires_session: entry.requires_session,
                    ends_session: entry.ends_session,
                    ordinal,
                    entry,
                },
            );
        }
        debug_assert_eq!(nodes.len(), reachable.len());

        let max_depth = longest_path(&nodes, &order, &desc.trigger);

        ExecutionGraph {
            workflow_id: desc.metadata.id,
            workflow_version: desc.metadata.version,
            trigger: desc.trigger.clone(),
            nodes,
            execution_order: order,
            metadata: GraphMetadata {
                requires_session,
                has_session_end,
                max_depth,
                has_cycles: false,
            },
        }
    }
}

fn build_adjacency(
    desc: &WorkflowDescription,
) -> (HashMap<String, Vec<EdgeRef>>, HashMap<String, Vec<EdgeRef>>) {
    let mut incoming: HashMap<String, Vec<EdgeRef>> = HashMap::new();
    let mut outgoing: HashMap<String, Vec<EdgeRef>> = HashMap::new();
    for node in &desc.nodes {
        incoming.entry(node.id.clone()).or_default();
        outgoing.entry(node.id.clone()).or_default();
    }
    for edge in &desc.edges {
        let edge_ref = EdgeRef {
            id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_handle: edge.source_handle.clone(),
            target_handle: edge.target_handle.clone(),
            condition: edge.condition.clone(),
        };
        outgoing.get_mut(&edge.source).expect("declared").push(edge_ref.clone());
        incoming.get_mut(&edge.target).expect("declared").push(edge_ref);
    }
    (incoming, outgoing)
}

/// Depth-first visit from the trigger. The emitted order is the reversed
/// post-order, so every predecessor precedes every successor. A back-edge
/// is a cycle; a node the visit never reached is unreachable.
fn depth_first_order(
    desc: &WorkflowDescription,
    outgoing: &HashMap<String, Vec<EdgeRef>>,
) -> Result<Vec<String>, Vec<CompileIssue>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        node_id: &str,
        outgoing: &HashMap<String, Vec<EdgeRef>>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
        post_order: &mut Vec<String>,
    ) -> Result<(), Vec<CompileIssue>> {
        marks.insert(node_id.to_string(), Mark::InProgress);
        stack.push(node_id.to_string());
        for edge in outgoing.get(node_id).into_iter().flatten() {
            match marks.get(&edge.target).copied().unwrap_or(Mark::Unvisited) {
                Mark::Unvisited => visit(&edge.target, outgoing, marks, stack, post_order)?,
                Mark::InProgress => {
                    let start = stack.iter().position(|n| n == &edge.target).unwrap_or(0);
                    let mut path: Vec<&str> = stack[start..].iter().map(String::as_str).collect();
                    path.push(edge.target.as_str());
                    return Err(vec![CompileIssue::new(
                        "cycle_detected",
                        format!("cycle detected: {}", path.join(" -> ")),
                    )
                    .on_node(&edge.target)]);
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks.insert(node_id.to_string(), Mark::Done);
        post_order.push(node_id.to_string());
        Ok(())
    }

    let mut marks: HashMap<String, Mark> = desc
        .nodes
        .iter()
        .map(|n| (n.id.clone(), Mark::Unvisited))
        .collect();
    let mut stack = Vec::new();
    let mut post_order = Vec::new();
    visit(&desc.trigger, outgoing, &mut marks, &mut stack, &mut post_order)?;

    let unreachable: Vec<CompileIssue> = desc
        .nodes
        .iter()
        .filter(|n| marks.get(&n.id) != Some(&Mark::Done))
        .map(|n| {
            CompileIssue::new("unreachable_node", format!("unreachable node: {}", n.id))
                .on_node(&n.id)
        })
        .collect();
    if !unreachable.is_empty() {
        return Err(unreachable);
    }

    post_order.reverse();
    Ok(post_order)
}

/// Longest path (in edges) from the trigger, computed over the
/// topological order.
fn longest_path(
    nodes: &HashMap<String, ExecutionNode>,
    order: &[String],
    trigger: &str,
) -> usize {
    let mut depth: HashMap<&str, usize> = HashMap::new();
    depth.insert(trigger, 0);
    let mut max_depth = 0;
    for node_id in order {
        let current = *depth.get(node_id.as_str()).unwrap_or(&0);
        max_depth = max_depth.max(current);
        for edge in &nodes[node_id].outgoing {
            let entry = depth.entry(edge.target.as_str()).or_insert(0);
            *entry = (*entry).max(current + 1);
        }
    }
    max_depth
}
