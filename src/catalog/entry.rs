use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use super::config_schema::{ConfigIssue, ConfigSchema};
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflow::RetryPolicy;

/// Functional grouping of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    Action,
    Logic,
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleDirection {
    Input,
    Output,
}

/// Rough shape of the data a handle carries, for builder tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataShape {
    Text,
    Number,
    Boolean,
    Object,
    Any,
}

/// A named connection point on a node.
#[derive(Debug, Clone, Serialize)]
pub struct HandleSpec {
    pub id: String,
    pub label: String,
    pub direction: HandleDirection,
    pub shape: DataShape,
}

impl HandleSpec {
    pub fn input(id: &str) -> Self {
        HandleSpec {
            id: id.to_string(),
            label: id.to_string(),
            direction: HandleDirection::Input,
            shape: DataShape::Any,
        }
    }

    pub fn output(id: &str) -> Self {
        HandleSpec {
            id: id.to_string(),
            label: id.to_string(),
            direction: HandleDirection::Output,
            shape: DataShape::Object,
        }
    }
}

/// Extra validation beyond what the declarative schema can express.
pub type CustomValidate = fn(&Map<String, Value>) -> Vec<ConfigIssue>;

/// Registry entry describing one node type.
#[derive(Debug)]
pub struct NodeCatalogEntry {
    pub node_type: String,
    pub category: NodeCategory,
    pub name: String,
    pub description: String,
    pub input_handles: Vec<HandleSpec>,
    pub output_handles: Vec<HandleSpec>,
    pub config_schema: ConfigSchema,
    pub allowed_incoming_types: Option<Vec<String>>,
    pub allowed_outgoing_types: Option<Vec<String>>,
    pub requires_session: bool,
    pub ends_session: bool,
    pub allows_multiple_inputs: bool,
    pub allows_multiple_outputs: bool,
    pub default_timeout_ms: Option<u64>,
    pub default_retry_policy: Option<RetryPolicy>,
    pub custom_validate: Option<CustomValidate>,
}

impl NodeCatalogEntry {
    /// Minimal entry with everything optional switched off; builtins and
    /// tests fill in the rest field-by-field.
    pub fn new(node_type: &str, category: NodeCategory, name: &str) -> Self {
        NodeCatalogEntry {
            node_type: node_type.to_string(),
            category,
            name: name.to_string(),
            description: String::new(),
            input_handles: Vec::new(),
            output_handles: Vec::new(),
            config_schema: ConfigSchema::empty(),
            allowed_incoming_types: None,
            allowed_outgoing_types: None,
            requires_session: false,
            ends_session: false,
            allows_multiple_inputs: false,
            allows_multiple_outputs: false,
            default_timeout_ms: None,
            default_retry_policy: None,
            custom_validate: None,
        }
    }

    pub fn is_trigger(&self) -> bool {
        self.category == NodeCategory::Trigger
    }
}

/// Process-wide registry of node types, populated at startup and
/// read-only afterwards.
pub struct NodeCatalog {
    entries: HashMap<String, Arc<NodeCatalogEntry>>,
}

impl NodeCatalog {
    pub fn empty() -> Self {
        NodeCatalog {
            entries: HashMap::new(),
        }
    }

    /// Registry with every builtin node type.
    pub fn with_builtins() -> Self {
        let mut catalog = NodeCatalog::empty();
        super::builtin::register_builtins(&mut catalog)
            .expect("builtin node types must not collide");
        catalog
    }

    pub fn register(&mut self, entry: NodeCatalogEntry) -> WorkflowResult<()> {
        if self.entries.contains_key(&entry.node_type) {
            return Err(WorkflowError::NodeTypeAlreadyRegistered(entry.node_type));
        }
        self.entries.insert(entry.node_type.clone(), Arc::new(entry));
        Ok(())
    }

    pub fn lookup(&self, node_type: &str) -> Option<Arc<NodeCatalogEntry>> {
        self.entries.get(node_type).cloned()
    }

    pub fn by_category(&self, category: NodeCategory) -> Vec<Arc<NodeCatalogEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.category == category)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        entries
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.entries.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run the declarative schema, then the custom hook when present.
    /// On success returns the config with defaults applied.
    pub fn validate_config(
        &self,
        node_type: &str,
        config: &Map<String, Value>,
    ) -> Result<Map<String, Value>, Vec<ConfigIssue>> {
        let Some(entry) = self.lookup(node_type) else {
            return Err(vec![ConfigIssue::new(
                "type",
                format!("unknown node type: {node_type}"),
            )]);
        };
        let resolved = entry.config_schema.resolve(config)?;
        if let Some(hook) = entry.custom_validate {
            let issues = hook(&resolved);
            if !issues.is_empty() {
                return Err(issues);
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_fails() {
        let mut catalog = NodeCatalog::empty();
        catalog
            .register(NodeCatalogEntry::new("x", NodeCategory::Action, "X"))
            .unwrap();
        let err = catalog
            .register(NodeCatalogEntry::new("x", NodeCategory::Action, "X"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NodeTypeAlreadyRegistered(_)));
    }

    #[test]
    fn lookup_and_category_listing() {
        let mut catalog = NodeCatalog::empty();
        catalog
            .register(NodeCatalogEntry::new("b", NodeCategory::Logic, "B"))
            .unwrap();
        catalog
            .register(NodeCatalogEntry::new("a", NodeCategory::Logic, "A"))
            .unwrap();
        assert!(catalog.lookup("a").is_some());
        assert!(catalog.lookup("zzz").is_none());
        let logic = catalog.by_category(NodeCategory::Logic);
        assert_eq!(logic.len(), 2);
        assert_eq!(logic[0].node_type, "a");
    }

    #[test]
    fn validate_config_unknown_type() {
        let catalog = NodeCatalog::empty();
        let err = catalog.validate_config("nope", &Map::new()).unwrap_err();
        assert!(err[0].message.contains("unknown node type"));
    }
}
