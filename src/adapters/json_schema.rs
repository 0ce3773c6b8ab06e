//! [`Schema`] implementation backed by the `jsonschema` crate.
//!
//! Query strings, path params, form bodies, headers and cookies only ever
//! carry strings, so for those targets values are first coerced towards the
//! types declared under the schema's `properties`.
use async_trait::async_trait;
use jsonschema::error::ValidationErrorKind;
use serde_json::{Map, Value};

use crate::ports::schema::{Schema, SchemaError, SchemaIssue, ValidationTarget};

pub struct JsonSchema {
    validator: jsonschema::Validator,
    schema: Value,
    coerce: bool,
}

impl JsonSchema {
    /// Compile `schema`. Coercion is off.
    pub fn compile(schema: Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| SchemaError::Internal(format!("invalid JSON Schema: {e}")))?;
        Ok(Self {
            validator,
            schema,
            coerce: false,
        })
    }

    /// Compile `schema` with coercion enabled for string-valued targets.
    pub fn for_target(schema: Value, target: ValidationTarget) -> Result<Self, SchemaError> {
        Ok(Self::compile(schema)?.coercing(target.is_stringly()))
    }

    pub fn coercing(mut self, coerce: bool) -> Self {
        self.coerce = coerce;
        self
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }
}

#[async_trait]
impl Schema for JsonSchema {
    async fn validate(&self, raw: Value) -> Result<Value, SchemaError> {
        let value = if self.coerce {
            coerce(&self.schema, raw)
        } else {
            raw
        };

        let issues: Vec<SchemaIssue> = self
            .validator
            .iter_errors(&value)
            .map(|e| {
                let mut path = pointer_to_dot(&e.instance_path.to_string());
                if let ValidationErrorKind::Required { property } = &e.kind {
                    let property = property
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| property.to_string());
                    path = if path.is_empty() {
                        property
                    } else {
                        format!("{path}.{property}")
                    };
                }
                SchemaIssue::new(path, e.to_string())
            })
            .collect();

        if issues.is_empty() {
            Ok(value)
        } else {
            Err(SchemaError::Invalid(issues))
        }
    }
}

/// `/a/0/b~1c` → `a.0.b/c`
fn pointer_to_dot(pointer: &str) -> String {
    pointer
        .split('/')
        .skip(1)
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

/// Coerce string leaves of `value` towards the types `schema` declares.
fn coerce(schema: &Value, value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let properties = schema.get("properties").and_then(Value::as_object);
            let coerced: Map<String, Value> = object
                .into_iter()
                .map(|(key, v)| {
                    let v = match properties.and_then(|p| p.get(&key)) {
                        Some(sub) => coerce(sub, v),
                        None => v,
                    };
                    (key, v)
                })
                .collect();
            Value::Object(coerced)
        }
        Value::Array(items) => {
            let item_schema = schema.get("items");
            Value::Array(
                items
                    .into_iter()
                    .map(|v| match item_schema {
                        Some(sub) => coerce(sub, v),
                        None => v,
                    })
                    .collect(),
            )
        }
        Value::String(s) => coerce_string(schema, s),
        other => other,
    }
}

fn coerce_string(schema: &Value, s: String) -> Value {
    let declared: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => return Value::String(s),
    };
    if declared.contains(&"string") {
        return Value::String(s);
    }

    for ty in declared {
        let coerced = match ty {
            "integer" => s.parse::<i64>().ok().map(Value::from),
            "number" => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            "boolean" => match s.as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            "null" if s.is_empty() => Some(Value::Null),
            "array" => Some(Value::Array(vec![coerce(
                schema.get("items").unwrap_or(&Value::Null),
                Value::String(s.clone()),
            )])),
            _ => None,
        };
        if let Some(v) = coerced {
            return v;
        }
    }
    Value::String(s)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user_schema() -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string", "minLength": 1},
                "age": {"type": "integer", "minimum": 0},
                "admin": {"type": "boolean"},
                "tags": {"type": "array", "items": {"type": "integer"}},
                "address": {
                    "type": "object",
                    "properties": {"zip": {"type": "string", "pattern": "^[0-9]{5}$"}}
                }
            }
        })
    }

    #[tokio::test]
    async fn test_required_property_path() {
        let schema = JsonSchema::compile(user_schema()).unwrap();
        let err = schema.validate(json!({})).await.unwrap_err();
        let SchemaError::Invalid(issues) = err else {
            panic!("expected invalid");
        };
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "name");
        assert!(!issues[0].message.is_empty());
    }

    #[tokio::test]
    async fn test_nested_path_is_dot_joined() {
        let schema = JsonSchema::compile(user_schema()).unwrap();
        let err = schema
            .validate(json!({"name": "ada", "address": {"zip": "abc"}}))
            .await
            .unwrap_err();
        let SchemaError::Invalid(issues) = err else {
            panic!("expected invalid");
        };
        assert_eq!(issues[0].path, "address.zip");
    }

    #[tokio::test]
    async fn test_coercion_for_string_targets() {
        let schema = JsonSchema::for_target(user_schema(), ValidationTarget::Query).unwrap();
        let value = schema
            .validate(json!({"name": "ada", "age": "36", "admin": "true", "tags": "7"}))
            .await
            .unwrap();
        assert_eq!(
            value,
            json!({"name": "ada", "age": 36, "admin": true, "tags": [7]})
        );

        let err = schema
            .validate(json!({"name": "ada", "age": "old"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(issues) if issues[0].path == "age"));
    }

    #[tokio::test]
    async fn test_json_target_is_not_coerced() {
        let schema = JsonSchema::for_target(user_schema(), ValidationTarget::Json).unwrap();
        assert!(schema.validate(json!({"name": "ada", "age": "36"})).await.is_err());
    }

    #[test]
    fn test_invalid_schema_is_internal_error() {
        assert!(matches!(
            JsonSchema::compile(json!({"type": 12})),
            Err(SchemaError::Internal(_))
        ));
    }

    #[test]
    fn test_pointer_to_dot() {
        assert_eq!(pointer_to_dot(""), "");
        assert_eq!(pointer_to_dot("/a/0/b~1c"), "a.0.b/c");
    }
}
