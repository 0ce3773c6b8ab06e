//! Request handling primitives shared by route files, middleware files and the
//! dispatcher.
//!
//! Every element of a request chain (interceptor, validation unit, terminal
//! handler) is a [`Handler`]: an `Arc`'d async function of `(Context, Next)`.
//! Terminal handlers simply never call `next`.
use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use axum::{
    Json,
    body::Body,
    http::{HeaderMap, Method, StatusCode, Uri, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Limited};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::ports::schema::ValidationTarget;

/// Default upper bound for buffered request bodies (2 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Result produced by every element of a request chain.
pub type HandlerResult = Result<Response, HandlerError>;

/// Errors raised while processing a request. Anything that reaches the
/// dispatcher's error boundary is turned into a generic 500.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Request body exceeds the limit of {0} bytes")]
    BodyTooLarge(usize),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Per-request state handed down a chain.
pub struct Context {
    parts: Parts,
    body: Option<Body>,
    buffered: Option<Bytes>,
    body_limit: usize,
    params: HashMap<String, String>,
    pattern: Option<String>,
    validated: Option<HashMap<ValidationTarget, Value>>,
}

impl Context {
    /// Wrap an incoming request with no matched route information.
    pub fn new(req: axum::http::Request<Body>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            parts,
            body: Some(body),
            buffered: None,
            body_limit: DEFAULT_BODY_LIMIT,
            params: HashMap::new(),
            pattern: None,
            validated: None,
        }
    }

    pub(crate) fn with_route(
        mut self,
        params: HashMap<String, String>,
        pattern: Option<String>,
        body_limit: usize,
    ) -> Self {
        self.params = params;
        self.pattern = pattern;
        self.body_limit = body_limit;
        self
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    /// First value of a header as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Matched path parameter (already percent-decoded).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// The route pattern (e.g. `/users/:id`) this request matched, if any.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Decoded query-string pairs in the order they appear.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First value of a query-string key.
    pub fn query(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn extensions(&self) -> &axum::http::Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut axum::http::Extensions {
        &mut self.parts.extensions
    }

    /// Buffer the request body. The underlying stream is consumed on the first
    /// call; later calls return the cached bytes.
    pub async fn body_bytes(&mut self) -> Result<Bytes, HandlerError> {
        if let Some(bytes) = &self.buffered {
            return Ok(bytes.clone());
        }
        let bytes = match self.body.take() {
            Some(body) => Limited::new(body, self.body_limit)
                .collect()
                .await
                .map_err(|e| {
                    if e.is::<http_body_util::LengthLimitError>() {
                        HandlerError::BodyTooLarge(self.body_limit)
                    } else {
                        HandlerError::BodyRead(e.to_string())
                    }
                })?
                .to_bytes(),
            None => Bytes::new(),
        };
        self.buffered = Some(bytes.clone());
        Ok(bytes)
    }

    /// Validated data for a target, once its validation unit has passed.
    pub fn valid(&self, target: ValidationTarget) -> Option<&Value> {
        self.validated.as_ref().and_then(|v| v.get(&target))
    }

    /// All validated targets as a JSON object keyed by target name.
    pub fn validated(&self) -> Value {
        let mut out = serde_json::Map::new();
        if let Some(validated) = &self.validated {
            for (target, value) in validated {
                out.insert(target.as_str().to_string(), value.clone());
            }
        }
        Value::Object(out)
    }

    pub(crate) fn set_valid(&mut self, target: ValidationTarget, value: Value) {
        self.validated
            .get_or_insert_with(HashMap::new)
            .insert(target, value);
    }

    /// 200 JSON response.
    pub fn json<T: Serialize>(&self, value: T) -> Response {
        (StatusCode::OK, Json(value)).into_response()
    }

    pub fn json_with_status<T: Serialize>(&self, status: StatusCode, value: T) -> Response {
        (status, Json(value)).into_response()
    }

    /// 200 plain-text response.
    pub fn text(&self, body: impl Into<String>) -> Response {
        (StatusCode::OK, body.into()).into_response()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

type HandlerFn = dyn Fn(Context, Next) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// One element of a request chain.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    /// Terminal handler: produces a response and never continues the chain.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx, _next| Box::pin(f(ctx))),
        }
    }

    /// Interceptor: may short-circuit or call [`Next::run`].
    pub fn middleware<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx, next| Box::pin(f(ctx, next))),
        }
    }

    pub fn call(&self, ctx: Context, next: Next) -> BoxFuture<'static, HandlerResult> {
        (self.inner)(ctx, next)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// Continuation of a request chain.
pub struct Next {
    chain: Arc<[Handler]>,
    index: usize,
}

impl Next {
    pub(crate) fn new(chain: Arc<[Handler]>) -> Self {
        Self { chain, index: 0 }
    }

    /// Run the remaining chain. Falling off the end yields a 404.
    pub async fn run(self, ctx: Context) -> HandlerResult {
        match self.chain.get(self.index).cloned() {
            Some(handler) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                };
                handler.call(ctx, next).await
            }
            None => Ok(not_found()),
        }
    }

    /// Number of chain elements not yet run.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index)
    }
}

pub fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "Not Found" })),
    )
        .into_response()
}

pub fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "message": "Internal Server Error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn ctx(uri: &str, body: &'static str) -> Context {
        Context::new(
            Request::builder()
                .uri(uri)
                .body(Body::from(body))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_body_is_buffered_once() {
        let mut c = ctx("/", "payload");
        assert_eq!(c.body_bytes().await.unwrap(), Bytes::from("payload"));
        assert_eq!(c.body_bytes().await.unwrap(), Bytes::from("payload"));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let mut c = ctx("/", "0123456789").with_route(HashMap::new(), None, 4);
        assert!(matches!(
            c.body_bytes().await,
            Err(HandlerError::BodyTooLarge(4))
        ));
    }

    #[test]
    fn test_query_pairs_are_decoded() {
        let c = ctx("/search?q=hello%20world&tag=a&tag=b", "");
        assert_eq!(c.query("q").as_deref(), Some("hello world"));
        assert_eq!(c.query_pairs().len(), 3);
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_and_falls_through_to_404() {
        let mark = Handler::middleware(|mut ctx: Context, next: Next| async move {
            ctx.headers_mut()
                .insert("x-mark", "1".parse().expect("static header"));
            next.run(ctx).await
        });
        let terminal = Handler::new(|ctx: Context| async move {
            Ok(ctx.text(ctx.header("x-mark").unwrap_or("missing").to_string()))
        });

        let chain: Arc<[Handler]> = vec![mark.clone(), terminal].into();
        let res = Next::new(chain).run(ctx("/", "")).await.unwrap();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"1");

        let only_mw: Arc<[Handler]> = vec![mark].into();
        let res = Next::new(only_mw).run(ctx("/", "")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validated_container_is_lazy() {
        let mut c = ctx("/", "");
        assert!(c.valid(ValidationTarget::Query).is_none());
        assert_eq!(c.validated(), json!({}));
        c.set_valid(ValidationTarget::Query, json!({"name": "x"}));
        assert_eq!(c.valid(ValidationTarget::Query), Some(&json!({"name": "x"})));
        assert_eq!(c.validated(), json!({"query": {"name": "x"}}));
    }
}
