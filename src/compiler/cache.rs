//! Compiled-graph cache keyed by `(workflow_id, version)`.
//!
//! Compilation is pure over the description and the catalog snapshot, so
//! graphs are safe to reuse. A content hash of the description guards
//! against a changed document being resubmitted under the same version.

use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::pipeline::{Compiled, CompileReport, WorkflowCompiler};
use crate::workflow::WorkflowDescription;

struct CacheEntry {
    content_hash: u64,
    compiled: Compiled,
}

pub struct CompileCache {
    entries: DashMap<(Uuid, u32), CacheEntry>,
}

impl CompileCache {
    pub fn new() -> Self {
        CompileCache {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch the cached graph for this description, or compile and cache.
    pub fn get_or_compile(
        &self,
        compiler: &WorkflowCompiler,
        desc: &WorkflowDescription,
    ) -> Result<Compiled, CompileReport> {
        let key = (desc.metadata.id, desc.metadata.version);
        let content_hash = hash_description(desc);
        if let Some(entry) = self.entries.get(&key) {
            if entry.content_hash == content_hash {
                return Ok(entry.compiled.clone());
            }
        }
        let compiled = compiler.compile(desc)?;
        self.entries.insert(
            key,
            CacheEntry {
                content_hash,
                compiled: compiled.clone(),
            },
        );
        Ok(compiled)
    }

    pub fn invalidate(&self, workflow_id: Uuid, version: u32) {
        self.entries.remove(&(workflow_id, version));
    }
}

impl Default for CompileCache {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_description(desc: &WorkflowDescription) -> u64 {
    let value = serde_json::to_value(desc).unwrap_or(Value::Null);
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hash_value(&value, &mut hasher);
    hasher.finish()
}

/// Structural hash with sorted object keys, so serialization order does
/// not affect the digest.
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            if let Some(i) = n.as_i64() {
                i.hash(state);
            } else if let Some(u) = n.as_u64() {
                u.hash(state);
            } else if let Some(f) = n.as_f64() {
                state.write(&f.to_le_bytes());
            }
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.len().hash(state);
            for key in keys {
                key.hash(state);
                if let Some(value) = map.get(key) {
                    hash_value(value, state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NodeCatalog;
    use serde_json::json;
    use std::sync::Arc;

    fn sms_echo() -> WorkflowDescription {
        serde_json::from_value(json!({
            "metadata": {
                "id": "7b1c6a4e-3f2d-4e8a-9c0b-1d2e3f4a5b6c",
                "version": 1,
                "name": "echo"
            },
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

    #[test]
    fn second_compile_hits_the_cache() {
        let compiler = WorkflowCompiler::new(Arc::new(NodeCatalog::with_builtins()));
        let cache = CompileCache::new();
        let desc = sms_echo();
        let first = cache.get_or_compile(&compiler, &desc).unwrap();
        let second = cache.get_or_compile(&compiler, &desc).unwrap();
        assert!(Arc::ptr_eq(&first.graph, &second.graph));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn changed_content_under_same_version_recompiles() {
        let compiler = WorkflowCompiler::new(Arc::new(NodeCatalog::with_builtins()));
        let cache = CompileCache::new();
        let desc = sms_echo();
        let first = cache.get_or_compile(&compiler, &desc).unwrap();

        let mut changed = desc.clone();
        changed.nodes[1]
            .config
            .insert("message".into(), json!("different"));
        let second = cache.get_or_compile(&compiler, &changed).unwrap();
        assert!(!Arc::ptr_eq(&first.graph, &second.graph));
    }

    #[test]
    fn hash_ignores_object_key_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [true, null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": [true, null], "x": 1}"#).unwrap();
        let mut ha = std::collections::hash_map::DefaultHasher::new();
        let mut hb = std::collections::hash_map::DefaultHasher::new();
        hash_value(&a, &mut ha);
        hash_value(&b, &mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }
}
