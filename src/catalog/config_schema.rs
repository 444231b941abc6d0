//! Declarative configuration schemas.
//!
//! Node configuration is validated against data, not code: a
//! [`ConfigSchema`] is a list of field declarations with shapes,
//! requiredness and defaults. Validation produces a flat list of
//! [`ConfigIssue`]s with dotted field paths.

use serde::Serialize;
use serde_json::{Map, Value};

/// One validation finding, addressed by field path.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigIssue {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Shape of a single configuration field.
#[derive(Debug, Clone)]
pub enum FieldShape {
    String {
        pattern: Option<&'static str>,
        one_of: Option<Vec<&'static str>>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number {
        min: Option<f64>,
    },
    Bool,
    /// Map of string keys to string values (template-capable).
    StringMap,
    Array(Box<FieldShape>),
    Object(Vec<FieldSchema>),
    /// Any JSON value; used for template-capable fields whose final type
    /// is only known after rendering.
    Value,
}

/// A named field with shape, requiredness and an optional default.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: &'static str,
    pub shape: FieldShape,
    pub required: bool,
    pub default: Option<Value>,
}

impl FieldSchema {
    pub fn string(name: &'static str) -> Self {
        FieldSchema {
            name,
            shape: FieldShape::String {
                pattern: None,
                one_of: None,
            },
            required: false,
            default: None,
        }
    }

    pub fn integer(name: &'static str) -> Self {
        FieldSchema {
            name,
            shape: FieldShape::Integer {
                min: None,
                max: None,
            },
            required: false,
            default: None,
        }
    }

    pub fn number(name: &'static str) -> Self {
        FieldSchema {
            name,
            shape: FieldShape::Number { min: None },
            required: false,
            default: None,
        }
    }

    pub fn bool(name: &'static str) -> Self {
        FieldSchema {
            name,
            shape: FieldShape::Bool,
            required: false,
            default: None,
        }
    }

    pub fn string_map(name: &'static str) -> Self {
        FieldSchema {
            name,
            shape: FieldShape::StringMap,
            required: false,
            default: None,
        }
    }

    pub fn array(name: &'static str, item: FieldShape) -> Self {
        FieldSchema {
            name,
            shape: FieldShape::Array(Box::new(item)),
            required: false,
            default: None,
        }
    }

    pub fn object(name: &'static str, fields: Vec<FieldSchema>) -> Self {
        FieldSchema {
            name,
            shape: FieldShape::Object(fields),
            required: false,
            default: None,
        }
    }

    pub fn value(name: &'static str) -> Self {
        FieldSchema {
            name,
            shape: FieldShape::Value,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn pattern(mut self, re: &'static str) -> Self {
        if let FieldShape::String { pattern, .. } = &mut self.shape {
            *pattern = Some(re);
        }
        self
    }

    pub fn one_of(mut self, values: Vec<&'static str>) -> Self {
        if let FieldShape::String { one_of, .. } = &mut self.shape {
            *one_of = Some(values);
        }
        self
    }

    pub fn min(mut self, value: i64) -> Self {
        match &mut self.shape {
            FieldShape::Integer { min, .. } => *min = Some(value),
            FieldShape::Number { min } => *min = Some(value as f64),
            _ => {}
        }
        self
    }

    pub fn max(mut self, value: i64) -> Self {
        if let FieldShape::Integer { max, .. } = &mut self.shape {
            *max = Some(value);
        }
        self
    }
}

/// Top-level object schema for a node type's configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    pub fields: Vec<FieldSchema>,
}

impl ConfigSchema {
    pub fn object(fields: Vec<FieldSchema>) -> Self {
        ConfigSchema { fields }
    }

    pub fn empty() -> Self {
        ConfigSchema { fields: Vec::new() }
    }

    /// Validate `config` and apply defaults.
    ///
    /// On success the returned map is the input with missing defaulted
    /// fields filled in. Unknown keys are preserved untouched.
    pub fn resolve(&self, config: &Map<String, Value>) -> Result<Map<String, Value>, Vec<ConfigIssue>> {
        let mut issues = Vec::new();
        let mut resolved = config.clone();
        for field in &self.fields {
            match config.get(field.name) {
                Some(value) => check_shape(field.name, &field.shape, value, &mut issues),
                None => {
                    if let Some(default) = &field.default {
                        resolved.insert(field.name.to_string(), default.clone());
                    } else if field.required {
                        issues.push(ConfigIssue::new(field.name, "missing required field"));
                    }
                }
            }
        }
        if issues.is_empty() {
            Ok(resolved)
        } else {
            Err(issues)
        }
    }
}

fn check_shape(path: &str, shape: &FieldShape, value: &Value, issues: &mut Vec<ConfigIssue>) {
    match shape {
        FieldShape::String { pattern, one_of } => {
            let Some(s) = value.as_str() else {
                issues.push(ConfigIssue::new(path, "expected a string"));
                return;
            };
            if let Some(re) = pattern {
                // Patterns are compile-time literals; an invalid one is a
                // programming error caught by the catalog tests.
                let re = regex::Regex::new(re).expect("invalid catalog field pattern");
                if !re.is_match(s) {
                    issues.push(ConfigIssue::new(path, format!("must match {}", re.as_str())));
                }
            }
            if let Some(allowed) = one_of {
                if !allowed.contains(&s) {
                    issues.push(ConfigIssue::new(
                        path,
                        format!("must be one of: {}", allowed.join(", ")),
                    ));
                }
            }
        }
        FieldShape::Integer { min, max } => {
            let Some(n) = value.as_i64() else {
                issues.push(ConfigIssue::new(path, "expected an integer"));
                return;
            };
            if let Some(min) = min {
                if n < *min {
                    issues.push(ConfigIssue::new(path, format!("must be >= {min}")));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    issues.push(ConfigIssue::new(path, format!("must be <= {max}")));
                }
            }
        }
        FieldShape::Number { min } => {
            // Template strings are allowed in numeric positions; they are
            // checked after rendering, at execution time.
            if value.is_string() {
                return;
            }
            let Some(n) = value.as_f64() else {
                issues.push(ConfigIssue::new(path, "expected a number"));
                return;
            };
            if let Some(min) = min {
                if n < *min {
                    issues.push(ConfigIssue::new(path, format!("must be >= {min}")));
                }
            }
        }
        FieldShape::Bool => {
            if !value.is_boolean() {
                issues.push(ConfigIssue::new(path, "expected a boolean"));
            }
        }
        FieldShape::StringMap => {
            let Some(map) = value.as_object() else {
                issues.push(ConfigIssue::new(path, "expected an object"));
                return;
            };
            for (k, v) in map {
                if !v.is_string() {
                    issues.push(ConfigIssue::new(
                        format!("{path}.{k}"),
                        "expected a string value",
                    ));
                }
            }
        }
        FieldShape::Array(item) => {
            let Some(items) = value.as_array() else {
                issues.push(ConfigIssue::new(path, "expected an array"));
                return;
            };
            for (i, v) in items.iter().enumerate() {
                check_shape(&format!("{path}.{i}"), item, v, issues);
            }
        }
        FieldShape::Object(fields) => {
            let Some(map) = value.as_object() else {
                issues.push(ConfigIssue::new(path, "expected an object"));
                return;
            };
            for field in fields {
                match map.get(field.name) {
                    Some(v) => check_shape(
                        &format!("{path}.{}", field.name),
                        &field.shape,
                        v,
                        issues,
                    ),
                    None if field.required => issues.push(ConfigIssue::new(
                        format!("{path}.{}", field.name),
                        "missing required field",
                    )),
                    None => {}
                }
            }
        }
        FieldShape::Value => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn required_field_missing() {
        let schema = ConfigSchema::object(vec![FieldSchema::string("to").required()]);
        let err = schema.resolve(&Map::new()).unwrap_err();
        assert_eq!(err[0].path, "to");
    }

    #[test]
    fn defaults_are_applied() {
        let schema = ConfigSchema::object(vec![
            FieldSchema::bool("case_sensitive").default_value(json!(false))
        ]);
        let resolved = schema.resolve(&Map::new()).unwrap();
        assert_eq!(resolved["case_sensitive"], json!(false));
    }

    #[test]
    fn enum_and_pattern_checks() {
        let schema = ConfigSchema::object(vec![
            FieldSchema::string("method")
                .required()
                .one_of(vec!["GET", "POST"]),
            FieldSchema::string("path")
                .required()
                .pattern(r"^/[A-Za-z0-9/_-]*$"),
        ]);
        let err = schema
            .resolve(&as_map(json!({"method": "YEET", "path": "no-slash"})))
            .unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(schema
            .resolve(&as_map(json!({"method": "GET", "path": "/cb/sms"})))
            .is_ok());
    }

    #[test]
    fn integer_bounds() {
        let schema =
            ConfigSchema::object(vec![FieldSchema::integer("max_requests").required().min(1)]);
        assert!(schema
            .resolve(&as_map(json!({"max_requests": 0})))
            .is_err());
        assert!(schema
            .resolve(&as_map(json!({"max_requests": 10})))
            .is_ok());
    }

    #[test]
    fn number_accepts_template_strings() {
        let schema = ConfigSchema::object(vec![FieldSchema::number("amount").required().min(0)]);
        assert!(schema
            .resolve(&as_map(json!({"amount": "{{amount}}"})))
            .is_ok());
        assert!(schema.resolve(&as_map(json!({"amount": -5}))).is_err());
    }

    #[test]
    fn string_map_rejects_non_string_values() {
        let schema = ConfigSchema::object(vec![FieldSchema::string_map("data").required()]);
        let err = schema
            .resolve(&as_map(json!({"data": {"step": 1}})))
            .unwrap_err();
        assert_eq!(err[0].path, "data.step");
    }

    #[test]
    fn nested_arrays_of_objects() {
        let schema = ConfigSchema::object(vec![FieldSchema::array(
            "cases",
            FieldShape::Object(vec![FieldSchema::string("value").required()]),
        )
        .required()]);
        let err = schema
            .resolve(&as_map(json!({"cases": [{"value": "a"}, {}]})))
            .unwrap_err();
        assert_eq!(err[0].path, "cases.1.value");
    }
}
