//! Per-generation route table.
//!
//! A `Dispatcher` is assembled by the route builder and then frozen behind an
//! `ArcSwap`; a rebuild never mutates a live instance, it replaces it. Every
//! instance carries its own error boundary so handler failures and panics
//! collapse to a generic 500.
use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
};
use futures_util::FutureExt;
use thiserror::Error;

use crate::core::{
    definition::{MethodKey, RouteDoc, RouteKey},
    handler::{Context, DEFAULT_BODY_LIMIT, Handler, Next, internal_error, not_found},
    path::{normalize_pattern, pattern_depth, to_matcher_syntax},
};

const SCOPE_REST_PARAM: &str = "__scope_rest";

/// Error type for dispatcher registration
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DispatchError {
    /// The route table already holds this method + pattern
    #[error("Route already registered: {0}")]
    Duplicate(RouteKey),

    /// The matcher rejected the pattern (conflict or malformed)
    #[error("Cannot register pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// The middleware key is not a dispatchable HTTP method
    #[error("Method key '{0}' cannot be registered as an endpoint")]
    NotAnEndpoint(MethodKey),
}

/// Summary line for route listings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RouteSummary {
    pub method: MethodKey,
    pub pattern: String,
    pub chain_len: usize,
}

struct Endpoint {
    pattern: String,
    methods: HashMap<Method, Arc<[Handler]>>,
}

struct ScopedMiddleware {
    scope: String,
    depth: usize,
    order: usize,
    matcher: matchit::Router<()>,
    handlers: Vec<Handler>,
}

pub struct Dispatcher {
    generation: u64,
    base_path: String,
    body_limit: usize,
    matcher: matchit::Router<usize>,
    endpoints: Vec<Endpoint>,
    scoped: Vec<ScopedMiddleware>,
    global: Vec<Handler>,
    docs: Vec<RouteDoc>,
}

impl Dispatcher {
    /// Fresh, empty route table for `generation`.
    pub fn new(generation: u64, base_path: &str) -> Self {
        Self {
            generation,
            base_path: normalize_pattern(base_path),
            body_limit: DEFAULT_BODY_LIMIT,
            matcher: matchit::Router::new(),
            endpoints: Vec::new(),
            scoped: Vec::new(),
            global: Vec::new(),
            docs: Vec::new(),
        }
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Bind middleware that runs before every request.
    pub fn use_global(&mut self, handler: Handler) {
        self.global.push(handler);
    }

    pub fn global_count(&self) -> usize {
        self.global.len()
    }

    /// Bind middleware that runs before every request whose path is `scope`
    /// or lies beneath it.
    pub fn use_scoped(&mut self, scope: &str, handlers: Vec<Handler>) -> Result<(), DispatchError> {
        let scope = normalize_pattern(scope);
        let base = to_matcher_syntax(&scope);
        let mut matcher = matchit::Router::new();

        let pattern_error = |e: matchit::InsertError| DispatchError::Pattern {
            pattern: scope.clone(),
            message: e.to_string(),
        };
        matcher.insert(base.clone(), ()).map_err(pattern_error)?;
        if !scope.split('/').any(|s| s.starts_with('*')) {
            let rest = if scope == "/" {
                format!("/{{*{SCOPE_REST_PARAM}}}")
            } else {
                format!("{base}/{{*{SCOPE_REST_PARAM}}}")
            };
            matcher.insert(rest, ()).map_err(pattern_error)?;
        }

        let order = self.scoped.len();
        self.scoped.push(ScopedMiddleware {
            depth: pattern_depth(&scope),
            scope,
            order,
            matcher,
            handlers,
        });
        Ok(())
    }

    /// Register a handler chain for one method + pattern.
    pub fn add_route(
        &mut self,
        method: MethodKey,
        pattern: &str,
        chain: Vec<Handler>,
    ) -> Result<(), DispatchError> {
        let http_method = method
            .http_method()
            .ok_or(DispatchError::NotAnEndpoint(method))?;
        let pattern = normalize_pattern(pattern);

        let index = match self.matcher.at(&matcher_probe(&pattern)) {
            Ok(matched) if self.endpoints[*matched.value].pattern == pattern => *matched.value,
            _ => {
                let index = self.endpoints.len();
                self.matcher
                    .insert(to_matcher_syntax(&pattern), index)
                    .map_err(|e| DispatchError::Pattern {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })?;
                self.endpoints.push(Endpoint {
                    pattern: pattern.clone(),
                    methods: HashMap::new(),
                });
                index
            }
        };

        let endpoint = &mut self.endpoints[index];
        if endpoint.methods.contains_key(&http_method) {
            return Err(DispatchError::Duplicate(RouteKey::new(method, pattern)));
        }
        endpoint.methods.insert(http_method, chain.into());
        Ok(())
    }

    pub fn add_doc(&mut self, doc: RouteDoc) {
        self.docs.push(doc);
    }

    /// Documentation entries collected during the build.
    pub fn docs(&self) -> &[RouteDoc] {
        &self.docs
    }

    pub fn has_route(&self, method: MethodKey, pattern: &str) -> bool {
        let (Some(http_method), pattern) = (method.http_method(), normalize_pattern(pattern))
        else {
            return false;
        };
        self.endpoints
            .iter()
            .any(|e| e.pattern == pattern && e.methods.contains_key(&http_method))
    }

    /// Registered endpoints and scoped middleware, sorted by pattern then method.
    pub fn routes(&self) -> Vec<RouteSummary> {
        let mut out: Vec<RouteSummary> = self
            .endpoints
            .iter()
            .flat_map(|e| {
                e.methods.iter().filter_map(|(m, chain)| {
                    MethodKey::from_method(m).map(|method| RouteSummary {
                        method,
                        pattern: e.pattern.clone(),
                        chain_len: chain.len(),
                    })
                })
            })
            .chain(self.scoped.iter().map(|s| RouteSummary {
                method: MethodKey::Use,
                pattern: s.scope.clone(),
                chain_len: s.handlers.len(),
            }))
            .collect();
        out.sort_by(|a, b| a.pattern.cmp(&b.pattern).then(a.method.cmp(&b.method)));
        out
    }

    fn strip_base<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.base_path == "/" {
            return Some(path);
        }
        match path.strip_prefix(self.base_path.as_str()) {
            Some("") => Some("/"),
            Some(rest) if rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }

    /// Run a request through global middleware, matching scoped middleware and
    /// the endpoint chain. Never fails: errors and panics become a 500.
    pub async fn dispatch(&self, req: Request<Body>) -> Response {
        let full_path = req.uri().path().to_string();
        let Some(path) = self.strip_base(&full_path) else {
            return not_found();
        };

        let mut chain: Vec<Handler> = self.global.clone();
        let mut params = HashMap::new();

        let mut scopes: Vec<(&ScopedMiddleware, matchit::Match<'_, '_, &()>)> = self
            .scoped
            .iter()
            .filter_map(|s| s.matcher.at(path).ok().map(|m| (s, m)))
            .collect();
        scopes.sort_by_key(|(s, _)| (s.depth, s.order));
        for (scope, matched) in scopes {
            collect_params(&mut params, &matched.params);
            chain.extend(scope.handlers.iter().cloned());
        }

        let mut pattern = None;
        if let Ok(matched) = self.matcher.at(path) {
            let endpoint = &self.endpoints[*matched.value];
            let method = req.method();
            let selected = endpoint.methods.get(method).or_else(|| {
                (*method == Method::HEAD)
                    .then(|| endpoint.methods.get(&Method::GET))
                    .flatten()
            });
            if let Some(endpoint_chain) = selected {
                collect_params(&mut params, &matched.params);
                chain.extend(endpoint_chain.iter().cloned());
                pattern = Some(endpoint.pattern.clone());
            }
        }

        let ctx = Context::new(req).with_route(params, pattern, self.body_limit);
        let next = Next::new(chain.into());

        match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(path = %full_path, "Request handler failed: {}", e);
                internal_error()
            }
            Err(_) => {
                tracing::error!(path = %full_path, "Request handler panicked");
                internal_error()
            }
        }
    }
}

fn collect_params(out: &mut HashMap<String, String>, params: &matchit::Params<'_, '_>) {
    for (key, value) in params.iter() {
        if key == SCOPE_REST_PARAM {
            continue;
        }
        let decoded = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        out.insert(key.to_string(), decoded);
    }
}

/// A concrete path that only the given pattern (or an identical one) matches,
/// used to find an existing endpoint for the same pattern.
fn matcher_probe(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|s| {
            if s.starts_with(':') || s.starts_with('*') {
                "\u{0}probe"
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
