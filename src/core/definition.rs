//! What a route file exports: a mapping from method key to handler or
//! handler configuration.
use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr, sync::Arc};

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::{
    core::handler::Handler,
    ports::schema::{Schema, SchemaMap, ValidationTarget},
};

/// Keys a route definition may use. `Use` is the reserved middleware key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodKey {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Use,
}

impl MethodKey {
    pub const ALL: [MethodKey; 8] = [
        MethodKey::Get,
        MethodKey::Post,
        MethodKey::Put,
        MethodKey::Patch,
        MethodKey::Delete,
        MethodKey::Head,
        MethodKey::Options,
        MethodKey::Use,
    ];

    /// Lowercase key as written in route files.
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKey::Get => "get",
            MethodKey::Post => "post",
            MethodKey::Put => "put",
            MethodKey::Patch => "patch",
            MethodKey::Delete => "delete",
            MethodKey::Head => "head",
            MethodKey::Options => "options",
            MethodKey::Use => "use",
        }
    }

    /// HTTP method this key dispatches on; `None` for the middleware key.
    pub fn http_method(&self) -> Option<Method> {
        match self {
            MethodKey::Get => Some(Method::GET),
            MethodKey::Post => Some(Method::POST),
            MethodKey::Put => Some(Method::PUT),
            MethodKey::Patch => Some(Method::PATCH),
            MethodKey::Delete => Some(Method::DELETE),
            MethodKey::Head => Some(Method::HEAD),
            MethodKey::Options => Some(Method::OPTIONS),
            MethodKey::Use => None,
        }
    }

    pub fn from_method(method: &Method) -> Option<Self> {
        MethodKey::ALL
            .into_iter()
            .find(|k| k.http_method().as_ref() == Some(method))
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for MethodKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        MethodKey::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| format!("unknown method key '{s}'"))
    }
}

/// Identity of a registered route within one build generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub method: MethodKey,
    pub pattern: String,
}

impl RouteKey {
    pub fn new(method: MethodKey, pattern: impl Into<String>) -> Self {
        Self {
            method,
            pattern: pattern.into(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

/// Documentation metadata attached to a route for introspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenApiMeta {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub operation_id: Option<String>,
    pub tags: Vec<String>,
    pub deprecated: bool,
}

/// Documentation entry as seen by a handler (via request extensions) or by
/// the dispatcher's route listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDoc {
    pub key: RouteKey,
    pub meta: OpenApiMeta,
    pub source: PathBuf,
}

/// Full configuration form of a method entry.
#[derive(Clone)]
pub struct RouteConfig {
    pub schema: SchemaMap,
    pub handler: Handler,
    pub openapi: Option<OpenApiMeta>,
    pub middleware: Vec<String>,
}

impl RouteConfig {
    pub fn new(handler: Handler) -> Self {
        Self {
            schema: SchemaMap::new(),
            handler,
            openapi: None,
            middleware: Vec::new(),
        }
    }

    pub fn schema(mut self, target: ValidationTarget, schema: impl Schema) -> Self {
        self.schema.insert(target, Arc::new(schema));
        self
    }

    pub fn schemas(mut self, schema: SchemaMap) -> Self {
        self.schema = schema;
        self
    }

    pub fn openapi(mut self, meta: OpenApiMeta) -> Self {
        self.openapi = Some(meta);
        self
    }

    pub fn middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware = names.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for RouteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteConfig")
            .field("schema", &self.schema)
            .field("openapi", &self.openapi)
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum MethodConfig {
    Plain(Handler),
    Configured(RouteConfig),
}

impl From<Handler> for MethodConfig {
    fn from(handler: Handler) -> Self {
        MethodConfig::Plain(handler)
    }
}

impl From<RouteConfig> for MethodConfig {
    fn from(config: RouteConfig) -> Self {
        MethodConfig::Configured(config)
    }
}

/// Default export of a route file.
#[derive(Debug, Clone, Default)]
pub struct RouteDefinition {
    methods: BTreeMap<MethodKey, MethodConfig>,
}

impl RouteDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, key: MethodKey, config: impl Into<MethodConfig>) -> Self {
        self.methods.insert(key, config.into());
        self
    }

    pub fn get(self, config: impl Into<MethodConfig>) -> Self {
        self.method(MethodKey::Get, config)
    }

    pub fn post(self, config: impl Into<MethodConfig>) -> Self {
        self.method(MethodKey::Post, config)
    }

    pub fn put(self, config: impl Into<MethodConfig>) -> Self {
        self.method(MethodKey::Put, config)
    }

    pub fn patch(self, config: impl Into<MethodConfig>) -> Self {
        self.method(MethodKey::Patch, config)
    }

    pub fn delete(self, config: impl Into<MethodConfig>) -> Self {
        self.method(MethodKey::Delete, config)
    }

    /// Middleware entry bound to this file's pattern and everything beneath it.
    pub fn with_middleware(self, config: impl Into<MethodConfig>) -> Self {
        self.method(MethodKey::Use, config)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MethodKey, &MethodConfig)> {
        self.methods.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_key_parsing() {
        assert_eq!("GET".parse::<MethodKey>(), Ok(MethodKey::Get));
        assert_eq!("use".parse::<MethodKey>(), Ok(MethodKey::Use));
        assert!("trace".parse::<MethodKey>().is_err());
        assert_eq!(MethodKey::from_method(&Method::DELETE), Some(MethodKey::Delete));
        assert_eq!(MethodKey::Use.http_method(), None);
    }

    #[test]
    fn test_route_key_does_not_collide_on_colons() {
        // A string key "GET:" + "/a:b" would be ambiguous; the typed key is not.
        let a = RouteKey::new(MethodKey::Get, "/a:b");
        let b = RouteKey::new(MethodKey::Get, "/a");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "GET /a:b");
    }

    #[test]
    fn test_definition_iterates_in_method_order() {
        let h = Handler::new(|ctx: crate::core::handler::Context| async move { Ok(ctx.text("x")) });
        let def = RouteDefinition::new()
            .post(h.clone())
            .get(RouteConfig::new(h.clone()).middleware(["auth"]))
            .with_middleware(h);
        let keys: Vec<_> = def.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![MethodKey::Get, MethodKey::Post, MethodKey::Use]);
    }
}
