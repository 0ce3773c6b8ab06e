use std::{fmt, future::Future, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Request data locations a schema can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationTarget {
    Query,
    Param,
    Json,
    Form,
    Header,
    Cookie,
}

impl ValidationTarget {
    pub const ALL: [ValidationTarget; 6] = [
        ValidationTarget::Query,
        ValidationTarget::Param,
        ValidationTarget::Json,
        ValidationTarget::Form,
        ValidationTarget::Header,
        ValidationTarget::Cookie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationTarget::Query => "query",
            ValidationTarget::Param => "param",
            ValidationTarget::Json => "json",
            ValidationTarget::Form => "form",
            ValidationTarget::Header => "header",
            ValidationTarget::Cookie => "cookie",
        }
    }

    /// Targets whose raw values arrive as strings and benefit from coercion.
    pub fn is_stringly(&self) -> bool {
        !matches!(self, ValidationTarget::Json)
    }
}

impl fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValidationTarget::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown validation target '{s}'"))
    }
}

/// One field-level schema failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    /// Dot-joined field path (empty for the root value).
    pub path: String,
    pub message: String,
}

impl SchemaIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum SchemaError {
    /// The value does not satisfy the schema.
    #[error("Validation failed with {} issue(s)", .0.len())]
    Invalid(Vec<SchemaIssue>),

    /// The schema itself could not run.
    #[error("{0}")]
    Internal(String),
}

/// Capability interface for a validation library: check a raw value and
/// return its typed/coerced form.
#[async_trait]
pub trait Schema: Send + Sync + 'static {
    async fn validate(&self, raw: Value) -> Result<Value, SchemaError>;
}

/// Adapts an async closure into a [`Schema`].
pub struct SchemaFn<F>(pub F);

#[async_trait]
impl<F, Fut> Schema for SchemaFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, SchemaError>> + Send + 'static,
{
    async fn validate(&self, raw: Value) -> Result<Value, SchemaError> {
        (self.0)(raw).await
    }
}

/// Mapping from validation target to schema. Keys are unique; insertion order
/// is kept so that the generated validation chain is reproducible.
#[derive(Clone, Default)]
pub struct SchemaMap {
    entries: Vec<(ValidationTarget, Arc<dyn Schema>)>,
}

impl SchemaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a schema to a target, replacing any previous binding in place.
    pub fn insert(&mut self, target: ValidationTarget, schema: Arc<dyn Schema>) {
        match self.entries.iter_mut().find(|(t, _)| *t == target) {
            Some(entry) => entry.1 = schema,
            None => self.entries.push((target, schema)),
        }
    }

    pub fn with(mut self, target: ValidationTarget, schema: impl Schema) -> Self {
        self.insert(target, Arc::new(schema));
        self
    }

    pub fn get(&self, target: ValidationTarget) -> Option<&Arc<dyn Schema>> {
        self.entries
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValidationTarget, &Arc<dyn Schema>)> {
        self.entries.iter().map(|(t, s)| (*t, s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SchemaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(t, _)| t))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn accept_all() -> impl Schema {
        SchemaFn(|v: Value| std::future::ready(Ok::<Value, SchemaError>(v)))
    }

    #[test]
    fn test_target_round_trips_through_str() {
        for target in ValidationTarget::ALL {
            assert_eq!(target.as_str().parse::<ValidationTarget>(), Ok(target));
        }
        assert!("body".parse::<ValidationTarget>().is_err());
    }

    #[test]
    fn test_schema_map_keeps_first_position_on_replace() {
        let mut map = SchemaMap::new()
            .with(ValidationTarget::Json, accept_all())
            .with(ValidationTarget::Query, accept_all());
        map.insert(ValidationTarget::Json, Arc::new(accept_all()));

        let order: Vec<_> = map.iter().map(|(t, _)| t).collect();
        assert_eq!(order, vec![ValidationTarget::Json, ValidationTarget::Query]);
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn test_schema_fn() {
        let schema = SchemaFn(|v: Value| async move {
            if v.get("ok").is_some() {
                Ok(v)
            } else {
                Err(SchemaError::Invalid(vec![SchemaIssue::new("ok", "Required")]))
            }
        });
        assert!(schema.validate(json!({"ok": 1})).await.is_ok());
        assert!(matches!(
            schema.validate(json!({})).await,
            Err(SchemaError::Invalid(issues)) if issues[0].path == "ok"
        ));
    }
}
