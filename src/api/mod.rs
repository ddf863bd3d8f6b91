//! Thin HTTP adapter: turns axum requests into [`ApiRequest`]s and pipeline
//! output back into responses. No policy lives here.

pub mod actions;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, PathRejection, QueryRejection};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;

use crate::errors::{ErrorBody, CODE_INTERNAL};
use crate::middleware::encode::{self, EncodeOptions};
use crate::pipeline::{ApiRequest, ApiResponse, Pipeline};

/// Build the HTTP router. Every action lives under `/api/:action`.
pub fn router(pipeline: Arc<Pipeline>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/:action", any(api_handler))
        .with_state(pipeline)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn api_handler(
    State(pipeline): State<Arc<Pipeline>>,
    action: Result<Path<String>, PathRejection>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // An unreadable query string leaves nothing to shape the error with.
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            return transport_error(
                rejection.status(),
                &rejection.body_text(),
                &EncodeOptions::default(),
            )
        }
    };
    let opts = EncodeOptions::from_query(&query);

    let action = match action {
        Ok(Path(action)) => action,
        Err(rejection) => {
            return transport_error(rejection.status(), &rejection.body_text(), &opts)
        }
    };
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            return transport_error(rejection.status(), &rejection.body_text(), &opts)
        }
    };

    let req = ApiRequest {
        method,
        action,
        query,
        body: parse_body(&headers, &body),
        basic_auth_user: basic_auth_user(&headers),
        remote_addr: connect_info.map(|ConnectInfo(addr)| addr),
    };

    into_http(pipeline.handle(req).await)
}

/// Extractor failures (bad path, oversized body) get the same error body and
/// envelope/JSONP shaping as pipeline errors.
fn transport_error(status: StatusCode, detail: &str, opts: &EncodeOptions) -> Response {
    tracing::info!(status = status.as_u16(), detail = %detail, "request rejected by transport");
    let message = status.canonical_reason().unwrap_or("Bad Request");
    let body = ErrorBody::new(CODE_INTERNAL, message);
    let encoded = encode::encode(&body.to_value(), opts, status);
    into_http(ApiResponse {
        status: encoded.status,
        headers: HeaderMap::new(),
        body: encoded.body,
        content_type: encoded.content_type,
    })
}

fn into_http(resp: ApiResponse) -> Response {
    let mut response = (resp.status, resp.body).into_response();
    let headers = response.headers_mut();
    headers.extend(resp.headers);
    let content_type = format!("{}; charset=utf-8", resp.content_type);
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    response
}

/// Username from `Authorization: Basic base64(user:password)`. The password is ignored.
pub fn basic_auth_user(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let user = match text.split_once(':') {
        Some((user, _password)) => user,
        None => text.as_str(),
    };
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

/// JSON or urlencoded form body. Anything unreadable becomes `Null`.
pub fn parse_body(headers: &HeaderMap, body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let map: Map<String, Value> = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Value::Object(map);
    }

    match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("ignoring unparseable request body: {}", e);
            Value::Null
        }
    }
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with gateway logs.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: hardening headers on every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    // responses may carry signatures and quota state
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    // tokens can travel in the query string
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.remove("server");

    resp
}
