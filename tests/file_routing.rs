// End-to-end checks of file-tree routing through the HTTP entry point.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use burrow::{
    Context, Handler, HttpHandler, JsonSchema, ManifestLoader, Next, RebuildCoordinator,
    RegistryLoader, RouteBuilder, RouteConfig, RouteDefinition,
    config::RoutingConfig,
    ports::schema::ValidationTarget,
};
use serde_json::{Value, json};
use tower::ServiceExt;

struct Site {
    _dir: tempfile::TempDir,
    routes: PathBuf,
    middleware: PathBuf,
    loader: Arc<RegistryLoader>,
}

impl Site {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            routes: dir.path().join("routes"),
            middleware: dir.path().join("middleware"),
            _dir: dir,
            loader: Arc::new(RegistryLoader::new()),
        }
    }

    fn write(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "# registered in memory").unwrap();
    }

    fn route(&self, rel: &str, def: RouteDefinition) {
        let path = self.routes.join(rel);
        Self::write(&path);
        self.loader.register_route(&path, def);
    }

    fn named_middleware(&self, rel: &str, handler: Handler) {
        let path = self.middleware.join(rel);
        Self::write(&path);
        self.loader.register_middleware(&path, handler);
    }

    fn routing(&self) -> RoutingConfig {
        RoutingConfig::new(&self.routes, &self.middleware).with_request_logging(false)
    }

    async fn start(&self) -> (Arc<RebuildCoordinator>, Router) {
        let coordinator = RebuildCoordinator::start(RouteBuilder::new(
            self.routing(),
            self.loader.clone(),
        ))
        .await
        .unwrap();
        let app = HttpHandler::new(coordinator.handle()).into_router(None);
        (coordinator, app)
    }
}

fn json_reply(value: Value) -> Handler {
    Handler::new(move |ctx: Context| {
        let value = value.clone();
        async move { Ok(ctx.json(value)) }
    })
}

fn echo_params() -> Handler {
    Handler::new(|ctx: Context| async move {
        let params = ctx.params().clone();
        Ok(ctx.json(json!({ "params": params, "pattern": ctx.pattern() })))
    })
}

fn tag(name: &'static str) -> Handler {
    Handler::middleware(move |ctx: Context, next: Next| async move {
        let mut res = next.run(ctx).await?;
        res.headers_mut().append("x-trace", name.parse().unwrap());
        Ok(res)
    })
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<String>, Value) {
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = res.status();
    let trace = res
        .headers()
        .get_all("x-trace")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, trace, value)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_static_and_dynamic_routes() {
    let site = Site::new();
    site.route(
        "hello.toml",
        RouteDefinition::new().get(json_reply(json!({ "message": "hi" }))),
    );
    site.route("index.toml", RouteDefinition::new().get(json_reply(json!("root"))));
    site.route("users/[id].toml", RouteDefinition::new().get(echo_params()));
    site.route("files/[...path].toml", RouteDefinition::new().get(echo_params()));
    let (_coordinator, app) = site.start().await;

    let (status, _, body) = send(&app, "GET", "/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "hi" }));

    let (status, _, body) = send(&app, "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("root"));

    let (_, _, body) = send(&app, "GET", "/users/42").await;
    assert_eq!(body["params"]["id"], "42");
    assert_eq!(body["pattern"], "/users/:id");

    let (_, _, body) = send(&app, "GET", "/files/a/b%20c.txt").await;
    assert_eq!(body["params"]["path"], "a/b c.txt");

    let (status, _, _) = send(&app, "POST", "/hello").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, "GET", "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_route_keeps_first_file() {
    let site = Site::new();
    // Subdirectories are walked before sibling files, so the index wins.
    site.route("users.toml", RouteDefinition::new().get(json_reply(json!("file"))));
    site.route("users/index.toml", RouteDefinition::new().get(json_reply(json!("dir"))));
    let (coordinator, app) = site.start().await;

    let report = coordinator.last_report();
    assert_eq!(report.duplicates.len(), 1);
    assert!(report.duplicates[0].file.ends_with("users.toml"));

    let (status, _, body) = send(&app, "GET", "/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("dir"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_named_middleware_does_not_block_route() {
    let site = Site::new();
    site.named_middleware("audit.toml", tag("audit"));
    site.route(
        "secret.toml",
        RouteDefinition::new().get(
            RouteConfig::new(json_reply(json!("secret"))).middleware(["auth", "audit"]),
        ),
    );
    let (coordinator, app) = site.start().await;

    let report = coordinator.last_report();
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("auth"));

    let (status, trace, body) = send(&app, "GET", "/secret").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace, vec!["audit"]);
    assert_eq!(body, json!("secret"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_middleware_layers_run_outermost_first() {
    let site = Site::new();
    site.named_middleware("_timing.toml", tag("global"));
    let dir_mw = site.routes.join("admin/_middleware.toml");
    Site::write(&dir_mw);
    site.loader.register_middleware(&dir_mw, tag("admin"));
    site.named_middleware("audit.toml", tag("named"));
    site.route(
        "admin/stats.toml",
        RouteDefinition::new()
            .get(RouteConfig::new(json_reply(json!("stats"))).middleware(["audit"])),
    );
    site.route("public.toml", RouteDefinition::new().get(json_reply(json!("public"))));
    let (_coordinator, app) = site.start().await;

    // Headers are appended on the way out, so the innermost layer comes first.
    let (_, trace, _) = send(&app, "GET", "/admin/stats").await;
    assert_eq!(trace, vec!["named", "admin", "global"]);

    let (_, trace, _) = send(&app, "GET", "/public").await;
    assert_eq!(trace, vec!["global"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_validation_rejects_bad_input() {
    let site = Site::new();
    let schema = JsonSchema::for_target(
        json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" }, "age": { "type": "integer" } }
        }),
        ValidationTarget::Query,
    )
    .unwrap();
    let handler = Handler::new(|ctx: Context| async move {
        let valid = ctx.valid(ValidationTarget::Query).cloned();
        Ok(ctx.json(valid))
    });
    site.route(
        "greet.toml",
        RouteDefinition::new().get(RouteConfig::new(handler).schema(ValidationTarget::Query, schema)),
    );
    let (_coordinator, app) = site.start().await;

    let (status, _, body) = send(&app, "GET", "/greet?age=3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"][0]["path"], "name");

    let (status, _, body) = send(&app, "GET", "/greet?name=ada&age=36").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "name": "ada", "age": 36 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_base_path_prefixes_every_route() {
    let site = Site::new();
    site.route("hello.toml", RouteDefinition::new().get(json_reply(json!("hi"))));
    let builder = RouteBuilder::new(site.routing().with_base_path("/api"), site.loader.clone());
    let coordinator = RebuildCoordinator::start(builder).await.unwrap();
    let app = HttpHandler::new(coordinator.handle()).into_router(None);

    let (status, _, _) = send(&app, "GET", "/api/hello").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&app, "GET", "/hello").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_manifest_tree() {
    let dir = tempfile::tempdir().unwrap();
    let routes = dir.path().join("routes");
    let middleware = dir.path().join("middleware");
    std::fs::create_dir_all(routes.join("items")).unwrap();
    std::fs::create_dir_all(&middleware).unwrap();

    std::fs::write(
        routes.join("items/[id].toml"),
        "[get]\necho = true\n\n[delete]\nstatus = 204\n",
    )
    .unwrap();
    std::fs::write(
        routes.join("health.json"),
        r#"{ "get": { "json": { "ok": true } } }"#,
    )
    .unwrap();
    std::fs::write(
        middleware.join("_powered.toml"),
        "[set_headers]\nx-powered-by = \"burrow\"\n",
    )
    .unwrap();

    let loader = Arc::new(ManifestLoader::new(&middleware));
    let builder = RouteBuilder::new(
        RoutingConfig::new(&routes, &middleware).with_request_logging(false),
        loader,
    );
    let coordinator = RebuildCoordinator::start(builder).await.unwrap();
    let app = HttpHandler::new(coordinator.handle()).into_router(None);

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/items/7").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-powered-by"], "burrow");
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["params"]["id"], "7");
    assert_eq!(body["pattern"], "/items/:id");

    let (status, _, _) = send(&app, "DELETE", "/items/7").await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, body) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}
