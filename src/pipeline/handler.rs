use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde_json::Value;

use crate::errors::{ErrorBody, CODE_INTERNAL};
use crate::models::token::TokenRecord;

/// Everything a business handler gets to see about the request.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub action: String,
    pub method: Method,
    /// `None` only for public actions.
    pub token: Option<TokenRecord>,
    /// Request body, already decrypted when the action requires it.
    pub payload: Value,
    pub query: HashMap<String, String>,
    pub remote_addr: Option<SocketAddr>,
}

/// What a handler returns. `sign` asks the pipeline to sign `body` with the token's key.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerReply {
    pub status: StatusCode,
    pub body: Value,
    pub sign: bool,
}

impl HandlerReply {
    pub fn ok(body: Value) -> Self {
        Self::with_status(StatusCode::OK, body)
    }

    pub fn with_status(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body,
            sign: false,
        }
    }

    /// Standard error body with a handler-chosen status and code.
    pub fn error(status: StatusCode, code: i32, message: impl Into<String>) -> Self {
        Self::with_status(status, ErrorBody::new(code, message).to_value())
    }

    pub fn signed(mut self) -> Self {
        self.sign = true;
        self
    }
}

/// Business logic plugged into the pipeline. Any `Err` becomes a 500 error body.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext) -> anyhow::Result<HandlerReply>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HandlerReply>> + Send,
{
    async fn handle(&self, ctx: HandlerContext) -> anyhow::Result<HandlerReply> {
        (self.0)(ctx).await
    }
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerReply>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Dispatches on `ctx.action`.
#[derive(Default, Clone)]
pub struct ActionRouter {
    routes: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.routes.insert(action.into(), handler);
        self
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

#[async_trait]
impl ActionHandler for ActionRouter {
    async fn handle(&self, ctx: HandlerContext) -> anyhow::Result<HandlerReply> {
        match self.routes.get(&ctx.action) {
            Some(handler) => handler.handle(ctx).await,
            None => Ok(HandlerReply::error(
                StatusCode::NOT_FOUND,
                CODE_INTERNAL,
                "Unknown action",
            )),
        }
    }
}
