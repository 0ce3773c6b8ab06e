use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    Router,
    body::Body,
    extract::Request,
    http::{HeaderValue, header},
    response::Response,
};
use tower_http::{compression::CompressionLayer, services::ServeDir};

use crate::{config::models::StaticFilesConfig, core::dispatcher::Dispatcher};

/// HTTP entry point: forwards every request to the current route table
/// generation.
#[derive(Clone)]
pub struct HttpHandler {
    dispatcher: Arc<ArcSwap<Dispatcher>>,
}

impl HttpHandler {
    pub fn new(dispatcher: Arc<ArcSwap<Dispatcher>>) -> Self {
        Self { dispatcher }
    }

    /// Dispatch against the generation that is live when the request arrives.
    /// A rebuild that lands mid-request does not affect it.
    pub async fn handle_request(&self, req: Request<Body>) -> Response {
        let dispatcher = self.dispatcher.load_full();
        let mut response = dispatcher.dispatch(req).await;
        if let Ok(value) = HeaderValue::from_str(&dispatcher.generation().to_string()) {
            response
                .headers_mut()
                .insert(header::HeaderName::from_static("x-route-generation"), value);
        }
        response
    }

    /// Build the axum application: static files (if configured) under their
    /// prefix, everything else through the dispatcher.
    pub fn into_router(self, static_files: Option<&StaticFilesConfig>) -> Router {
        let handler = Arc::new(self);
        let mut app = Router::new().fallback(move |req: Request| {
            let handler = handler.clone();
            async move { handler.handle_request(req).await }
        });

        if let Some(static_files) = static_files {
            tracing::info!(
                prefix = %static_files.url_prefix,
                root = %static_files.root.display(),
                "Serving static files"
            );
            app = app.nest_service(
                &static_files.url_prefix,
                ServeDir::new(&static_files.root).append_index_html_on_directories(true),
            );
        }

        app.layer(CompressionLayer::new())
    }
}
