//! Built-in middleware bound by the server rather than loaded from files.
use std::time::Instant;

use axum::http::HeaderValue;
use tracing::Instrument;

use crate::core::handler::{Context, Handler, Next};

/// Header carrying the per-request id, honoured if the client sends one.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id made available to later handlers through request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Log method, path, status and latency of every request under a span
/// carrying a request id, and echo the id back in `X-Request-ID`.
pub fn request_logger() -> Handler {
    Handler::middleware(|mut ctx: Context, next: Next| async move {
        let start = Instant::now();
        let request_id = ctx
            .header(REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        ctx.extensions_mut().insert(RequestId(request_id.clone()));

        let method = ctx.method().clone();
        let path = ctx.path().to_string();
        let span = tracing::info_span!("request", request_id = %request_id);

        let result = next.run(ctx).instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(mut response) => {
                tracing::info!(
                    request_id = %request_id,
                    %method,
                    path = %path,
                    status = response.status().as_u16(),
                    latency_ms,
                    "Request completed"
                );
                if let Ok(value) = HeaderValue::from_str(&request_id) {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    %method,
                    path = %path,
                    latency_ms,
                    "Request failed: {}",
                    e
                );
                Err(e)
            }
        }
    })
}
