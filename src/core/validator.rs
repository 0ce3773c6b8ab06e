//! Turns a [`SchemaMap`] into request-validating chain elements.
//!
//! Each unit extracts raw data for its target, runs the target's schema and
//! either short-circuits with a 400 or stores the typed value on the context.
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Multipart},
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};

use crate::{
    core::handler::{Context, Handler, HandlerError, Next},
    ports::schema::{Schema, SchemaError, SchemaIssue, SchemaMap, ValidationTarget},
};

/// Build one validation unit per target, in the map's order. The units are
/// meant to run sequentially in a single chain.
pub fn build_validators(schema: &SchemaMap) -> Vec<Handler> {
    schema
        .iter()
        .map(|(target, schema)| validation_unit(target, schema.clone()))
        .collect()
}

fn validation_unit(target: ValidationTarget, schema: Arc<dyn Schema>) -> Handler {
    Handler::middleware(move |mut ctx: Context, next: Next| {
        let schema = schema.clone();
        async move {
            let raw = match extract_target(&mut ctx, target).await {
                Ok(raw) => raw,
                Err(HandlerError::BodyTooLarge(limit)) => {
                    return Ok(validation_error_response(&format!(
                        "request body exceeds {limit} bytes"
                    )));
                }
                Err(e) => return Err(e),
            };

            match schema.validate(raw).await {
                Ok(value) => {
                    ctx.set_valid(target, value);
                    next.run(ctx).await
                }
                Err(SchemaError::Invalid(issues)) => {
                    tracing::debug!(
                        target_name = %target,
                        path = ctx.path(),
                        issues = issues.len(),
                        "Request rejected by schema"
                    );
                    Ok(validation_failed_response(&issues))
                }
                Err(SchemaError::Internal(message)) => {
                    tracing::warn!(target_name = %target, "Schema failed to run: {}", message);
                    Ok(validation_error_response(&message))
                }
            }
        }
    })
}

/// Pull the raw value for `target` out of the request.
pub async fn extract_target(
    ctx: &mut Context,
    target: ValidationTarget,
) -> Result<Value, HandlerError> {
    let value = match target {
        ValidationTarget::Query => pairs_to_object(
            ctx.query_pairs()
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        ),
        ValidationTarget::Param => Value::Object(
            ctx.params()
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
        ValidationTarget::Json => {
            let bytes = ctx.body_bytes().await?;
            // Unparseable bodies are left for the schema to reject.
            serde_json::from_slice::<Value>(&bytes).unwrap_or_else(|_| Value::Object(Map::new()))
        }
        ValidationTarget::Form => {
            let content_type = ctx
                .header(header::CONTENT_TYPE.as_str())
                .unwrap_or_default()
                .to_string();
            let media_type = content_type.split(';').next().unwrap_or_default().trim();
            if media_type.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
                let bytes = ctx.body_bytes().await?;
                let pairs = url::form_urlencoded::parse(&bytes)
                    .into_owned()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                pairs_to_object(pairs)
            } else if media_type.eq_ignore_ascii_case("multipart/form-data") {
                let bytes = ctx.body_bytes().await?;
                parse_multipart(&content_type, bytes).await
            } else {
                Value::Object(Map::new())
            }
        }
        ValidationTarget::Header => headers_to_object(ctx),
        ValidationTarget::Cookie => Value::Object(
            ctx.header(header::COOKIE.as_str())
                .map(parse_cookies)
                .unwrap_or_default(),
        ),
    };
    Ok(value)
}

/// Single occurrences map to their value, repeated keys to arrays.
fn pairs_to_object(pairs: Vec<(String, Value)>) -> Value {
    let mut out = Map::new();
    for (key, value) in pairs {
        match out.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                out.insert(key, value);
            }
        }
    }
    Value::Object(out)
}

/// Text parts become strings; file parts become `{filename, content_type,
/// size}`. A malformed body yields whatever parsed before the error, leaving
/// missing fields for the schema to reject.
async fn parse_multipart(content_type: &str, body: bytes::Bytes) -> Value {
    let req = match Request::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
    {
        Ok(req) => req,
        Err(_) => return Value::Object(Map::new()),
    };
    let mut multipart = match Multipart::from_request(req, &()).await {
        Ok(multipart) => multipart,
        Err(e) => {
            tracing::debug!("Unreadable multipart body: {}", e);
            return Value::Object(Map::new());
        }
    };

    let mut pairs = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Malformed multipart field: {}", e);
                break;
            }
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = match field.file_name().map(str::to_string) {
            Some(filename) => {
                let part_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                match field.bytes().await {
                    Ok(content) => json!({
                        "filename": filename,
                        "content_type": part_type,
                        "size": content.len(),
                    }),
                    Err(_) => break,
                }
            }
            None => match field.text().await {
                Ok(text) => Value::String(text),
                Err(_) => break,
            },
        };
        pairs.push((name, value));
    }
    pairs_to_object(pairs)
}

fn headers_to_object(ctx: &Context) -> Value {
    let mut out = Map::new();
    for name in ctx.headers().keys() {
        let joined = ctx
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        out.insert(name.as_str().to_string(), Value::String(joined));
    }
    Value::Object(out)
}

/// Split a `Cookie` header on `;`, then each pair on its first `=`.
pub fn parse_cookies(header: &str) -> Map<String, Value> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), Value::String(value.trim().to_string())))
        })
        .collect()
}

/// 400 body for schema rejections.
pub fn validation_failed_response(issues: &[SchemaIssue]) -> Response {
    let errors: Vec<Value> = issues
        .iter()
        .map(|i| json!({ "path": i.path, "message": i.message }))
        .collect();
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "message": "Validation failed",
            "errors": errors,
        })),
    )
        .into_response()
}

/// 400 body for unexpected failures while validating.
pub fn validation_error_response(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "message": "Validation error",
            "error": description,
        })),
    )
        .into_response()
}
