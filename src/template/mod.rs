//! Template rendering against a variable scope.
//!
//! Templates use double-brace placeholders: `{{dotted.path}}`. A path that
//! does not resolve, or resolves to null, is left verbatim in the output so
//! downstream consumers can tell "missing" from "empty".

pub mod predicate;

pub use predicate::evaluate_predicate;

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").unwrap())
}

/// Resolve a dotted path against a scope.
///
/// Returns `None` when any segment is missing or the final value is null.
pub fn resolve_path<'a>(scope: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = scope.get(first)?;
    for segment in segments {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                current = items.get(idx)?;
            }
            _ => return None,
        }
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{{path}}` in `template` with its resolved value.
///
/// Unresolved placeholders survive verbatim, which makes `render`
/// idempotent: rendering an already-rendered string is a no-op.
pub fn render(template: &str, scope: &Map<String, Value>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match resolve_path(scope, &caps[1]) {
                Some(value) => value_to_text(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn render_value(value: &Value, scope: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, scope)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, scope)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_value(v, scope)).collect())
        }
        other => other.clone(),
    }
}

/// Apply [`render`] to every string value in `map`, recursively.
/// Non-string leaves are preserved as-is.
pub fn render_map(map: &Map<String, Value>, scope: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), render_value(v, scope)))
        .collect()
}

/// Compose a node's template scope: context variables overlaid with the
/// node's assembled input (input wins on key collisions).
pub fn compose_scope(
    variables: &Map<String, Value>,
    input: &Map<String, Value>,
) -> Map<String, Value> {
    let mut scope = variables.clone();
    for (k, v) in input {
        scope.insert(k.clone(), v.clone());
    }
    scope
}
