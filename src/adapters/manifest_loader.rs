//! Declarative route and middleware files.
//!
//! A route manifest maps method keys to canned responses:
//!
//! ```toml
//! [get]
//! json = { message = "hi" }
//!
//! [post]
//! status = 201
//! echo = true
//! middleware = ["auth"]
//! schema.json = { type = "object", required = ["name"] }
//! openapi = { summary = "Create a thing" }
//! ```
//!
//! A middleware manifest (any file under the middleware root, or a file whose
//! name starts with `_`) describes one interceptor:
//!
//! ```toml
//! require_header = "authorization"
//! reject_status = 401
//! set_headers = { "x-powered-by" = "burrow" }
//! ```
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use axum::{
    Json,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    adapters::json_schema::JsonSchema,
    core::{
        definition::{MethodConfig, MethodKey, OpenApiMeta, RouteConfig, RouteDefinition, RouteDoc},
        handler::{Context, Handler, Next},
    },
    ports::{
        module_loader::{LoadError, LoadResult, MIDDLEWARE_EXPORT_KEY, ModuleExport, ModuleLoader},
        schema::{SchemaMap, ValidationTarget},
    },
};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RouteEntry {
    status: Option<u16>,
    json: Option<Value>,
    text: Option<String>,
    headers: BTreeMap<String, String>,
    echo: bool,
    schema: BTreeMap<String, Value>,
    middleware: Vec<String>,
    openapi: Option<OpenApiMeta>,
}

fn default_reject_status() -> u16 {
    401
}

fn default_reject_message() -> String {
    "Unauthorized".to_string()
}

#[derive(Debug, Deserialize)]
struct MiddlewareEntry {
    #[serde(default)]
    set_headers: BTreeMap<String, String>,
    #[serde(default)]
    require_header: Option<String>,
    #[serde(default = "default_reject_status")]
    reject_status: u16,
    #[serde(default = "default_reject_message")]
    reject_message: String,
}

struct CannedResponse {
    status: StatusCode,
    json: Option<Value>,
    text: Option<String>,
    headers: Vec<(HeaderName, HeaderValue)>,
    echo: bool,
}

impl CannedResponse {
    fn render(&self, ctx: &Context) -> Response {
        let mut res = if let Some(body) = &self.json {
            (self.status, Json(body.clone())).into_response()
        } else if let Some(body) = &self.text {
            (self.status, body.clone()).into_response()
        } else if self.echo {
            (self.status, Json(echo(ctx))).into_response()
        } else {
            self.status.into_response()
        };
        for (name, value) in &self.headers {
            res.headers_mut().insert(name.clone(), value.clone());
        }
        res
    }
}

/// Request summary returned by `echo = true` routes.
fn echo(ctx: &Context) -> Value {
    let query: Map<String, Value> = ctx
        .query_pairs()
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let mut body = json!({
        "method": ctx.method().as_str(),
        "path": ctx.path(),
        "pattern": ctx.pattern(),
        "params": ctx.params(),
        "query": query,
        "valid": ctx.validated(),
    });
    if let Some(doc) = ctx.extensions().get::<RouteDoc>() {
        body["openapi"] = serde_json::to_value(&doc.meta).unwrap_or(Value::Null);
    }
    body
}

struct HeaderGate {
    set_headers: Vec<(HeaderName, HeaderValue)>,
    require_header: Option<HeaderName>,
    reject_status: StatusCode,
    reject_message: String,
}

fn gate_handler(gate: HeaderGate) -> Handler {
    let gate = Arc::new(gate);
    Handler::middleware(move |ctx: Context, next: Next| {
        let gate = gate.clone();
        async move {
            if let Some(required) = &gate.require_header {
                if !ctx.headers().contains_key(required) {
                    return Ok((
                        gate.reject_status,
                        Json(json!({ "success": false, "message": gate.reject_message })),
                    )
                        .into_response());
                }
            }
            let mut res = next.run(ctx).await?;
            for (name, value) in &gate.set_headers {
                res.headers_mut().insert(name.clone(), value.clone());
            }
            Ok(res)
        }
    })
}

/// Module loader for TOML / YAML / JSON manifests, parsed with the `config`
/// crate and cached per path until invalidated.
pub struct ManifestLoader {
    middleware_root: PathBuf,
    cache: scc::HashMap<PathBuf, Option<ModuleExport>>,
}

impl ManifestLoader {
    pub fn new(middleware_root: impl Into<PathBuf>) -> Self {
        Self {
            middleware_root: middleware_root.into(),
            cache: scc::HashMap::default(),
        }
    }

    fn is_middleware(&self, path: &Path) -> bool {
        path.starts_with(&self.middleware_root)
            || path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with('_'))
    }

    fn parse(&self, path: &Path, content: &str) -> LoadResult<Option<ModuleExport>> {
        if content.trim().is_empty() {
            return Ok(None);
        }

        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            Some("ini") => FileFormat::Ini,
            other => {
                return Err(invalid(
                    path,
                    format!("unsupported manifest extension {other:?}"),
                ));
            }
        };

        let document: Map<String, Value> = Config::builder()
            .add_source(File::from_str(content, format))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LoadError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if document.is_empty() {
            return Ok(None);
        }

        if self.is_middleware(path) {
            let handler = parse_middleware(path, Value::Object(document))?;
            return Ok(Some(ModuleExport::Object(HashMap::from([(
                MIDDLEWARE_EXPORT_KEY.to_string(),
                handler,
            )]))));
        }

        let mut definition = RouteDefinition::new();
        for (key, entry) in document {
            let method: MethodKey = key.parse().map_err(|e: String| invalid(path, e))?;
            let config = match method {
                MethodKey::Use => MethodConfig::Plain(parse_middleware(path, entry)?),
                _ => parse_route_entry(path, entry)?,
            };
            definition = definition.method(method, config);
        }
        Ok(Some(ModuleExport::Routes(definition)))
    }
}

fn invalid(path: &Path, message: impl Into<String>) -> LoadError {
    LoadError::Invalid {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn parse_headers(path: &Path, headers: BTreeMap<String, String>) -> LoadResult<Vec<(HeaderName, HeaderValue)>> {
    headers
        .into_iter()
        .map(|(name, value)| {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(path, format!("header name '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(&value)
                .map_err(|e| invalid(path, format!("header '{name}' value: {e}")))?;
            Ok((header_name, header_value))
        })
        .collect()
}

fn parse_status(path: &Path, status: u16) -> LoadResult<StatusCode> {
    StatusCode::from_u16(status).map_err(|e| invalid(path, format!("status {status}: {e}")))
}

fn parse_middleware(path: &Path, entry: Value) -> LoadResult<Handler> {
    let entry: MiddlewareEntry =
        serde_json::from_value(entry).map_err(|e| invalid(path, e.to_string()))?;
    let require_header = entry
        .require_header
        .map(|name| {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(path, format!("require_header '{name}': {e}")))
        })
        .transpose()?;
    Ok(gate_handler(HeaderGate {
        set_headers: parse_headers(path, entry.set_headers)?,
        require_header,
        reject_status: parse_status(path, entry.reject_status)?,
        reject_message: entry.reject_message,
    }))
}

fn parse_route_entry(path: &Path, entry: Value) -> LoadResult<MethodConfig> {
    let entry: RouteEntry =
        serde_json::from_value(entry).map_err(|e| invalid(path, e.to_string()))?;

    let canned = Arc::new(CannedResponse {
        status: parse_status(path, entry.status.unwrap_or(200))?,
        json: entry.json,
        text: entry.text,
        headers: parse_headers(path, entry.headers)?,
        echo: entry.echo,
    });
    let handler = Handler::new(move |ctx: Context| {
        let canned = canned.clone();
        async move { Ok(canned.render(&ctx)) }
    });

    if entry.schema.is_empty() && entry.middleware.is_empty() && entry.openapi.is_none() {
        return Ok(MethodConfig::Plain(handler));
    }

    let mut schema = SchemaMap::new();
    for (target, document) in entry.schema {
        let target: ValidationTarget = target.parse().map_err(|e: String| invalid(path, e))?;
        let compiled = JsonSchema::for_target(document, target)
            .map_err(|e| invalid(path, format!("schema.{target}: {e}")))?;
        schema.insert(target, Arc::new(compiled));
    }

    let mut config = RouteConfig::new(handler)
        .schemas(schema)
        .middleware(entry.middleware);
    if let Some(meta) = entry.openapi {
        config = config.openapi(meta);
    }
    Ok(MethodConfig::Configured(config))
}

#[async_trait]
impl ModuleLoader for ManifestLoader {
    async fn load(&self, path: &Path) -> LoadResult<Option<ModuleExport>> {
        if let Some(cached) = self
            .cache
            .get_async(path)
            .await
            .map(|entry| entry.get().clone())
        {
            return Ok(cached);
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound(path.to_path_buf())
            } else {
                LoadError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let export = self.parse(path, &content)?;
        let _ = self
            .cache
            .insert_async(path.to_path_buf(), export.clone())
            .await;
        Ok(export)
    }

    fn invalidate(&self, path: &Path) {
        self.cache.remove_sync(path);
    }

    fn invalidate_all(&self) {
        self.cache.clear_sync();
    }
}
