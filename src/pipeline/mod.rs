//! Request orchestration: auth → quota → decrypt → dispatch → sign → encode.
//!
//! Every failure is turned into a JSON error body here; nothing escapes
//! [`Pipeline::handle`] as an error.

pub mod handler;
pub mod provision;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::Value;

use crate::crypto::CryptoChannel;
use crate::errors::{DecryptError, GatewayError, SignError};
use crate::middleware::auth::{mask_token, select_credential, AuthGate};
use crate::middleware::encode::{self, EncodeOptions};
use crate::middleware::rate_limit::{RateLimiter, DEFAULT_CAS_RETRIES};
use crate::models::token::TokenRecord;
use crate::store::TokenStore;

use handler::{ActionHandler, HandlerContext, HandlerReply};

/// Query parameter and body field carrying an encrypted envelope.
pub const ENCRYPTED_FIELD: &str = "encrypted";
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Transport-neutral view of an inbound request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub action: String,
    pub query: HashMap<String, String>,
    /// Parsed body; `Value::Null` when there was none.
    pub body: Value,
    /// Username half of HTTP Basic auth, if the transport saw one.
    pub basic_auth_user: Option<String>,
    pub remote_addr: Option<SocketAddr>,
}

impl ApiRequest {
    pub fn new(method: Method, action: impl Into<String>) -> Self {
        Self {
            method,
            action: action.into(),
            query: HashMap::new(),
            body: Value::Null,
            basic_auth_user: None,
            remote_addr: None,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn basic_auth(mut self, user: impl Into<String>) -> Self {
        self.basic_auth_user = Some(user.into());
        self
    }

    fn is_post_like(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }
}

/// What goes back over the wire.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    pub content_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Skip authentication and quota.
    pub public_actions: HashSet<String>,
    /// Accept plain bodies on POST-like requests.
    pub unencrypted_actions: HashSet<String>,
    pub cas_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            public_actions: HashSet::new(),
            unencrypted_actions: HashSet::new(),
            cas_retries: DEFAULT_CAS_RETRIES,
        }
    }
}

pub struct Pipeline {
    auth: AuthGate,
    limiter: RateLimiter,
    handler: Arc<dyn ActionHandler>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn TokenStore>,
        handler: Arc<dyn ActionHandler>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            auth: AuthGate::new(store.clone()),
            limiter: RateLimiter::new(store).with_max_retries(config.cas_retries),
            handler,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one request to completion. Always yields a response.
    #[tracing::instrument(skip_all, fields(action = %req.action, method = %req.method))]
    pub async fn handle(&self, req: ApiRequest) -> ApiResponse {
        let opts = EncodeOptions::from_query(&req.query);
        let mut headers = HeaderMap::new();

        let (status, payload) = match self.run(&req, &mut headers).await {
            Ok(reply) => (reply.status, reply.body),
            Err(err) => {
                let status = err.status();
                tracing::info!(status = status.as_u16(), error = %err, "request rejected");
                if matches!(err, GatewayError::Unauthenticated) {
                    headers.insert(
                        WWW_AUTHENTICATE,
                        HeaderValue::from_static("Basic realm=\"API\""),
                    );
                }
                (status, err.error_body().to_value())
            }
        };

        let encoded = encode::encode(&payload, &opts, status);
        ApiResponse {
            status: encoded.status,
            headers,
            body: encoded.body,
            content_type: encoded.content_type,
        }
    }

    async fn run(
        &self,
        req: &ApiRequest,
        headers: &mut HeaderMap,
    ) -> Result<HandlerReply, GatewayError> {
        let token = if self.config.public_actions.contains(&req.action) {
            None
        } else {
            Some(self.authenticate(req, headers).await?)
        };

        let mut query = req.query.clone();
        let mut payload = req.body.clone();
        if req.is_post_like() && !self.config.unencrypted_actions.contains(&req.action) {
            let envelope = take_envelope(&mut query, &mut payload)?;
            payload = self.decrypt(token.as_ref(), envelope).await?;
        }

        let ctx = HandlerContext {
            action: req.action.clone(),
            method: req.method.clone(),
            token: token.clone(),
            payload,
            query,
            remote_addr: req.remote_addr,
        };
        let mut reply = self.dispatch(ctx).await?;

        if reply.sign {
            let signed = self.sign(token.as_ref(), reply.body).await?;
            reply.body = serde_json::to_value(signed).map_err(SignError::from)?;
        }
        Ok(reply)
    }

    async fn authenticate(
        &self,
        req: &ApiRequest,
        headers: &mut HeaderMap,
    ) -> Result<TokenRecord, GatewayError> {
        let credential = select_credential(
            req.basic_auth_user.as_deref(),
            req.query.get(ACCESS_TOKEN_PARAM).map(String::as_str),
        );
        let token = self.auth.resolve(credential).await?;

        let quota = self.limiter.charge(&token, 1).await?;
        for (name, value) in quota.headers() {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
        if quota.is_exceeded() {
            tracing::warn!(
                token = %mask_token(&token.access_token),
                "rejecting over-quota request"
            );
            return Err(GatewayError::QuotaExceeded);
        }
        Ok(token)
    }

    async fn decrypt(
        &self,
        token: Option<&TokenRecord>,
        envelope: String,
    ) -> Result<Value, GatewayError> {
        let token = token.ok_or(DecryptError::NoToken)?;
        let channel = CryptoChannel::for_token(token);
        let opened = tokio::task::spawn_blocking(move || channel.decrypt(&envelope))
            .await
            .map_err(|e| GatewayError::Internal(format!("decrypt task failed: {}", e)))?;
        opened.map_err(|e| {
            tracing::debug!(token_id = %token.id, error = %e, "envelope rejected");
            GatewayError::Decrypt(e)
        })
    }

    async fn dispatch(&self, ctx: HandlerContext) -> Result<HandlerReply, GatewayError> {
        let handler = self.handler.clone();
        match tokio::spawn(async move { handler.handle(ctx).await }).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "handler failed");
                Err(GatewayError::Handler(e.to_string()))
            }
            Err(join) => {
                let message = panic_message(join);
                tracing::error!(error = %message, "handler panicked");
                Err(GatewayError::Handler(message))
            }
        }
    }

    async fn sign(
        &self,
        token: Option<&TokenRecord>,
        body: Value,
    ) -> Result<crate::crypto::SignedPayload, GatewayError> {
        let token = token.ok_or(SignError::NoToken)?;
        let channel = CryptoChannel::for_token(token);
        let signed = tokio::task::spawn_blocking(move || channel.sign(&body))
            .await
            .map_err(|e| GatewayError::Internal(format!("sign task failed: {}", e)))?;
        Ok(signed?)
    }
}

/// Pulls the envelope from the query first, then from the body, removing it from both.
fn take_envelope(
    query: &mut HashMap<String, String>,
    payload: &mut Value,
) -> Result<String, DecryptError> {
    if let Some(envelope) = query.remove(ENCRYPTED_FIELD).filter(|e| !e.is_empty()) {
        return Ok(envelope);
    }
    if let Value::Object(map) = payload {
        if let Some(Value::String(envelope)) = map.shift_remove(ENCRYPTED_FIELD) {
            if !envelope.is_empty() {
                return Ok(envelope);
            }
        }
    }
    Err(DecryptError::Missing)
}

fn panic_message(join: tokio::task::JoinError) -> String {
    if !join.is_panic() {
        return "handler cancelled".to_string();
    }
    let panic = join.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_envelope_prefers_query() {
        let mut query = HashMap::from([(ENCRYPTED_FIELD.to_string(), "q:q:q".to_string())]);
        let mut body = json!({"encrypted": "b:b:b"});
        assert_eq!(take_envelope(&mut query, &mut body).unwrap(), "q:q:q");
        assert!(query.is_empty());
    }

    #[test]
    fn test_take_envelope_from_body() {
        let mut query = HashMap::new();
        let mut body = json!({"encrypted": "b:b:b", "other": 1});
        assert_eq!(take_envelope(&mut query, &mut body).unwrap(), "b:b:b");
        assert_eq!(body, json!({"other": 1}));
    }

    #[test]
    fn test_take_envelope_missing() {
        let mut query = HashMap::new();
        let mut body = json!({"plain": true});
        assert!(matches!(
            take_envelope(&mut query, &mut body),
            Err(DecryptError::Missing)
        ));
        let mut body = json!({"encrypted": 5});
        assert!(take_envelope(&mut query, &mut body).is_err());
    }
}
